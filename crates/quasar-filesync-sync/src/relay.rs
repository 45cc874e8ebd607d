//! WebSocket client for the Quasar relay.
//!
//! One socket per session. A writer task owns the sink half; a reader task
//! owns the stream half and feeds frames through [`RelayLink`], which
//! tracks channel membership and the outstanding pairing code request.
//!
//! The relay broadcasts every `data` frame to the whole channel, sender
//! included. Our own frames come back in the order we sent them and are
//! dropped before they reach the message handler.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::messages::{ClientId, RelayEvent, RelayRequest, PROTOCOL_VERSION};
use crate::transport::{
    lock, Inbox, LinkState, MessageHandler, PairingMode, Result, Transport, TransportError,
};

/// Relay client settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Limit on socket open plus handshake.
    pub connect_timeout: Duration,
    /// Limit on waiting for a pairing code.
    pub code_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            code_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the socket URL for `endpoint` and `mode`.
///
/// Endpoints without a `ws://` or `wss://` scheme default to `wss://`.
pub fn connection_url(endpoint: &str, mode: &PairingMode) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let base = if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{endpoint}")
    };
    match mode {
        PairingMode::NewChannel => format!("{base}/ws/new"),
        PairingMode::Code(code) => format!("{base}/ws/connect?code={code}"),
        PairingMode::ChannelId(id) => format!("{base}/ws/connect?id={id}"),
    }
}

#[derive(Default)]
struct Membership {
    id: Option<ClientId>,
    channel: Option<String>,
    clients: HashSet<ClientId>,
    pending_code: Option<oneshot::Sender<String>>,
}

/// Relay-side state shared by the reader task and the transport handle.
struct RelayLink {
    link: watch::Sender<LinkState>,
    inbox: Inbox,
    membership: Mutex<Membership>,
    /// Data frames we sent whose echo has not come back yet.
    echoes: Mutex<VecDeque<String>>,
}

impl RelayLink {
    fn new() -> Self {
        let (link, _) = watch::channel(LinkState::Connected { peers: 0 });
        Self {
            link,
            inbox: Inbox::default(),
            membership: Mutex::new(Membership::default()),
            echoes: Mutex::new(VecDeque::new()),
        }
    }

    /// Note an outgoing data frame so its echo can be recognized.
    fn expect_echo(&self, content: &str) {
        lock(&self.echoes).push_back(content.to_string());
    }

    fn is_ready(&self) -> bool {
        lock(&self.membership).id.is_some()
    }

    /// Apply one text frame. Errors are fatal for the link.
    fn handle_frame(&self, text: &str) -> Result<()> {
        let event: RelayEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable relay frame");
                return Ok(());
            }
        };

        match event {
            RelayEvent::ConnectionInfo {
                id,
                channel_uuid,
                client_ids,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(TransportError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        relay: protocol_version,
                    });
                }
                tracing::debug!(client = %id, channel = %channel_uuid, "relay handshake complete");
                let mut membership = lock(&self.membership);
                membership.id = Some(id);
                membership.channel = Some(channel_uuid);
                membership.clients = client_ids.into_iter().collect();
                self.publish(&membership);
            }
            RelayEvent::GeneratedCode { code } => {
                let pending = lock(&self.membership).pending_code.take();
                match pending {
                    Some(reply) => {
                        tracing::debug!(%code, "received pairing code");
                        let _ = reply.send(code);
                    }
                    None => {
                        return Err(TransportError::Protocol(
                            "generated_code without a pending request".into(),
                        ))
                    }
                }
            }
            RelayEvent::Data { content } => {
                let mut echoes = lock(&self.echoes);
                if echoes.front() == Some(&content) {
                    echoes.pop_front();
                    tracing::trace!(bytes = content.len(), "dropping echo of own frame");
                } else {
                    drop(echoes);
                    self.inbox.deliver(content);
                }
            }
            RelayEvent::ClientConnected { id } => {
                tracing::debug!(client = %id, "client connected");
                let mut membership = lock(&self.membership);
                membership.clients.insert(id);
                self.publish(&membership);
            }
            RelayEvent::ClientDisconnected { id } => {
                tracing::debug!(client = %id, "client disconnected");
                let mut membership = lock(&self.membership);
                membership.clients.remove(&id);
                self.publish(&membership);
            }
        }
        Ok(())
    }

    fn publish(&self, membership: &Membership) {
        let peers = membership.clients.len();
        self.link.send_if_modified(|state| {
            if state.is_terminal() || *state == (LinkState::Connected { peers }) {
                return false;
            }
            *state = LinkState::Connected { peers };
            true
        });
    }

    fn fail(&self, reason: String) {
        tracing::error!(%reason, "relay link failed");
        lock(&self.membership).pending_code = None;
        self.link.send_replace(LinkState::Failed(reason));
    }

    fn close(&self) {
        lock(&self.membership).pending_code = None;
        self.link.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = LinkState::Closed;
            true
        });
    }
}

/// Transport over a Quasar relay WebSocket.
pub struct RelayTransport {
    shared: Arc<RelayLink>,
    outgoing: mpsc::UnboundedSender<Message>,
    config: RelayConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayTransport {
    /// Open a socket to `endpoint`, join a channel per `mode` and finish the
    /// handshake.
    pub async fn connect(endpoint: &str, mode: &PairingMode, config: RelayConfig) -> Result<Self> {
        let url = connection_url(endpoint, mode);
        tracing::debug!(%url, "connecting to relay");

        let (socket, _response) = timeout(config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(format!("connecting to {url}")))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let shared = Arc::new(RelayLink::new());
        let handshake = async {
            while !shared.is_ready() {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => shared.handle_frame(&text)?,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(TransportError::ConnectionFailed(
                            "relay closed the connection during handshake".into(),
                        ))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
                }
            }
            Ok::<(), TransportError>(())
        };
        timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout("relay handshake".into()))??;

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "relay write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_link = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = reader_link.handle_frame(&text) {
                            reader_link.fail(e.to_string());
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "relay read failed");
                        break;
                    }
                }
            }
            tracing::info!("disconnected from relay");
            reader_link.close();
        });

        Ok(Self {
            shared,
            outgoing,
            config,
            tasks: vec![writer, reader],
        })
    }

    /// Our client id on the relay.
    pub fn client_id(&self) -> Option<ClientId> {
        lock(&self.shared.membership).id
    }

    fn push(&self, request: &RelayRequest) -> Result<()> {
        if self.shared.link.borrow().is_terminal() {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(request)
            .map_err(|e| TransportError::Protocol(format!("encoding frame: {e}")))?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, text: String) -> Result<()> {
        tracing::trace!(bytes = text.len(), "sending data frame");
        self.shared.expect_echo(&text);
        let sent = self.push(&RelayRequest::Data { content: text });
        if sent.is_err() {
            lock(&self.shared.echoes).pop_back();
        }
        sent
    }

    fn on_message(&self, handler: MessageHandler) {
        self.shared.inbox.install(handler);
    }

    fn link_state(&self) -> watch::Receiver<LinkState> {
        self.shared.link.subscribe()
    }

    async fn generate_code(&self) -> Result<String> {
        let reply = {
            let mut membership = lock(&self.shared.membership);
            if membership.pending_code.is_some() {
                drop(membership);
                self.shared
                    .fail("generate_code called while another request is pending".into());
                return Err(TransportError::CodeRequestPending);
            }
            let (tx, rx) = oneshot::channel();
            membership.pending_code = Some(tx);
            rx
        };
        self.push(&RelayRequest::GenerateCode)?;

        match timeout(self.config.code_timeout, reply).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                lock(&self.shared.membership).pending_code = None;
                Err(TransportError::Timeout("waiting for pairing code".into()))
            }
        }
    }

    fn channel_id(&self) -> String {
        lock(&self.shared.membership)
            .channel
            .clone()
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing relay connection");
        let _ = self.outgoing.send(Message::Close(None));
        self.shared.close();
        Ok(())
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
