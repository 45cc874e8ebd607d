//! Session lifecycle: connect, pair, sync, close.
//!
//! ```text
//! Connecting --> AwaitingPeer --> Paired --> Closed
//!      \______________\______________________/^
//! ```
//!
//! Progress is published on a [`watch`] channel. The pairing code, when one
//! is generated, is published on a second channel so a front end can show
//! it while the session waits for the other party.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use quasar_filesync_core::Role;
use quasar_filesync_store::{HashCache, Workspace};

use crate::engine::{SyncEngine, SyncReport};
use crate::error::{Result, SyncError};
use crate::queue::MessageQueue;
use crate::transport::{LinkState, PairingMode, Transport, TransportError};
use crate::watcher::ChangeSource;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    AwaitingPeer,
    Paired,
    Closed,
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The other party left the channel.
    PeerLeft,
    /// The relay closed the link.
    TransportClosed,
    /// Shutdown was requested.
    Shutdown,
    /// The local change source stopped producing events.
    SourceEnded,
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Leader or follower.
    pub role: Role,
    /// How to join the relay channel.
    pub pairing: PairingMode,
    /// Bound on buffered inbound messages; `None` for unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Follower,
            pairing: PairingMode::NewChannel,
            queue_capacity: None,
        }
    }
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub reason: CloseReason,
    pub report: SyncReport,
    /// Hash cache at close.
    pub cache: HashCache,
}

impl SessionOutcome {
    fn unpaired(reason: CloseReason) -> Self {
        Self {
            reason,
            report: SyncReport::default(),
            cache: HashCache::new(),
        }
    }
}

/// A sync session over one workspace.
pub struct Session<W: Workspace> {
    config: SessionConfig,
    workspace: Arc<W>,
    state: watch::Sender<SessionState>,
    pairing_code: watch::Sender<Option<String>>,
}

impl<W: Workspace> Session<W> {
    /// Create a session; nothing happens until [`run`](Self::run).
    pub fn new(config: SessionConfig, workspace: Arc<W>) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        let (pairing_code, _) = watch::channel(None);
        Self {
            config,
            workspace,
            state,
            pairing_code,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to lifecycle changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Subscribe to the pairing code, set once the relay hands one out.
    pub fn pairing_code(&self) -> watch::Receiver<Option<String>> {
        self.pairing_code.subscribe()
    }

    /// Run the session to completion.
    ///
    /// `connect` opens the transport. Connection failures and protocol
    /// violations are returned as errors; everything else ends the session
    /// with a [`CloseReason`].
    pub async fn run<T, F, C>(
        &self,
        connect: F,
        mut source: C,
        shutdown: CancellationToken,
    ) -> Result<SessionOutcome>
    where
        T: Transport,
        F: Future<Output = std::result::Result<T, TransportError>>,
        C: ChangeSource,
    {
        self.set_state(SessionState::Connecting);
        let transport = tokio::select! {
            _ = shutdown.cancelled() => {
                self.set_state(SessionState::Closed);
                return Err(SyncError::Cancelled);
            }
            result = connect => match result {
                Ok(transport) => Arc::new(transport),
                Err(e) => {
                    tracing::error!(error = %e, "could not connect to relay");
                    self.set_state(SessionState::Closed);
                    return Err(e.into());
                }
            },
        };
        tracing::info!(channel = %transport.channel_id(), "connected to relay");

        let result = self.run_connected(&transport, &mut source, &shutdown).await;

        source.stop();
        if let Err(e) = transport.close().await {
            tracing::warn!(error = %e, "error closing transport");
        }
        self.set_state(SessionState::Closed);
        match &result {
            Ok(outcome) => tracing::info!(reason = ?outcome.reason, "session closed"),
            Err(e) => tracing::error!(error = %e, "session failed"),
        }
        result
    }

    async fn run_connected<T: Transport, C: ChangeSource>(
        &self,
        transport: &Arc<T>,
        source: &mut C,
        shutdown: &CancellationToken,
    ) -> Result<SessionOutcome> {
        let queue = Arc::new(MessageQueue::with_capacity(self.config.queue_capacity));
        let inbound = queue.clone();
        transport.on_message(Box::new(move |text| {
            if let Err(e) = inbound.push(text) {
                tracing::warn!(error = %e, "dropping inbound message");
            }
        }));

        self.set_state(SessionState::AwaitingPeer);
        let mut link = transport.link_state();

        if transport.peer_count() == 1 {
            let code = tokio::select! {
                _ = shutdown.cancelled() => return Ok(SessionOutcome::unpaired(CloseReason::Shutdown)),
                code = transport.generate_code() => code?,
            };
            tracing::info!(%code, "pairing code ready, share it with the other party");
            self.pairing_code.send_replace(Some(code));
        }

        if let Some(reason) = wait_for_peer(&mut link, shutdown).await? {
            queue.close();
            return Ok(SessionOutcome::unpaired(reason));
        }
        self.set_state(SessionState::Paired);
        tracing::info!(role = %self.config.role, "paired with peer");

        let engine = SyncEngine::new(self.config.role, self.workspace.clone(), transport.clone());
        let mut events = source.start()?;

        let reason = tokio::select! {
            result = engine.run(&queue, shutdown) => {
                result?;
                CloseReason::Shutdown
            }
            result = engine.run_local(&mut events, shutdown) => {
                result?;
                if shutdown.is_cancelled() {
                    CloseReason::Shutdown
                } else {
                    CloseReason::SourceEnded
                }
            }
            reason = watch_peer(&mut link) => reason?,
        };
        queue.close();

        Ok(SessionOutcome {
            reason,
            report: engine.report().await,
            cache: engine.cache().await,
        })
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "session state");
        }
    }
}

/// Wait until both parties are present. `Some` means the session ended first.
async fn wait_for_peer(
    link: &mut watch::Receiver<LinkState>,
    shutdown: &CancellationToken,
) -> Result<Option<CloseReason>> {
    loop {
        let current = link.borrow_and_update().clone();
        match current {
            LinkState::Connected { peers } if peers >= 2 => return Ok(None),
            LinkState::Connected { .. } => {}
            LinkState::Closed => return Ok(Some(CloseReason::TransportClosed)),
            LinkState::Failed(reason) => return Err(SyncError::ProtocolViolation(reason)),
        }
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(Some(CloseReason::Shutdown)),
            changed = link.changed() => {
                if changed.is_err() {
                    return Ok(Some(CloseReason::TransportClosed));
                }
            }
        }
    }
}

/// Resolve once the pair breaks up.
async fn watch_peer(link: &mut watch::Receiver<LinkState>) -> Result<CloseReason> {
    loop {
        let current = link.borrow_and_update().clone();
        match current {
            LinkState::Connected { peers } if peers >= 2 => {}
            LinkState::Connected { .. } => {
                tracing::info!("peer left the channel");
                return Ok(CloseReason::PeerLeft);
            }
            LinkState::Closed => return Ok(CloseReason::TransportClosed),
            LinkState::Failed(reason) => return Err(SyncError::ProtocolViolation(reason)),
        }
        if link.changed().await.is_err() {
            return Ok(CloseReason::TransportClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryRelay;
    use crate::watcher::ManualChangeSource;
    use quasar_filesync_core::{ChangeEvent, ChangeKind, ContentHash, RelativePath};
    use quasar_filesync_store::{MemoryWorkspace, WorkspaceExt};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Transport whose link state the test drives by hand.
    struct ScriptedTransport {
        link: Arc<watch::Sender<LinkState>>,
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _text: String) -> crate::transport::Result<()> {
            Ok(())
        }

        fn on_message(&self, _handler: crate::transport::MessageHandler) {}

        fn link_state(&self) -> watch::Receiver<LinkState> {
            self.link.subscribe()
        }

        async fn generate_code(&self) -> crate::transport::Result<String> {
            Err(TransportError::Closed)
        }

        fn channel_id(&self) -> String {
            "scripted".into()
        }

        async fn close(&self) -> crate::transport::Result<()> {
            Ok(())
        }
    }

    fn scripted(initial: LinkState) -> Arc<watch::Sender<LinkState>> {
        Arc::new(watch::channel(initial).0)
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_pairing_and_sync_over_memory_relay() {
        let relay = MemoryRelay::with_seed(11);
        let path = RelativePath::new("notes.md").unwrap();

        let leader_ws = Arc::new(MemoryWorkspace::with_files([(
            path.clone(),
            bytes::Bytes::from_static(b"from leader"),
        )]));
        let follower_ws = Arc::new(MemoryWorkspace::new());

        let leader = Arc::new(Session::new(
            SessionConfig {
                role: Role::Leader,
                ..SessionConfig::default()
            },
            leader_ws.clone(),
        ));
        let mut leader_state = leader.state();
        let mut code_rx = leader.pairing_code();
        let shutdown = CancellationToken::new();

        let leader_source = ManualChangeSource::new();
        let leader_events = leader_source.sender();
        let leader_task = {
            let leader = leader.clone();
            let relay = relay.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                leader
                    .run(
                        async move { relay.connect(&PairingMode::NewChannel) },
                        leader_source,
                        shutdown,
                    )
                    .await
            })
        };

        let code = code_rx
            .wait_for(Option::is_some)
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(*leader_state.borrow_and_update(), SessionState::AwaitingPeer);

        let follower = Arc::new(Session::new(SessionConfig::default(), follower_ws.clone()));
        let follower_source = ManualChangeSource::new();
        let follower_task = {
            let follower = follower.clone();
            let relay = relay.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                follower
                    .run(
                        async move { relay.connect(&PairingMode::Code(code)) },
                        follower_source,
                        shutdown,
                    )
                    .await
            })
        };

        leader_state
            .wait_for(|s| *s == SessionState::Paired)
            .await
            .unwrap();

        leader_events
            .send(ChangeEvent::new(
                ChangeKind::Add,
                PathBuf::from("notes.md"),
                path.clone(),
            ))
            .unwrap();

        {
            let follower_ws = follower_ws.clone();
            let path = path.clone();
            wait_until(move || {
                let follower_ws = follower_ws.clone();
                let path = path.clone();
                async move {
                    follower_ws.hash_of(&path).await.unwrap() == ContentHash::of(b"from leader")
                }
            })
            .await;
        }

        shutdown.cancel();
        let leader_outcome = leader_task.await.unwrap().unwrap();
        let follower_outcome = follower_task.await.unwrap().unwrap();

        assert_eq!(leader_outcome.report.sent, 1);
        assert_eq!(follower_outcome.report.applied, 1);
        assert_eq!(follower_outcome.cache.get(&path), ContentHash::of(b"from leader"));
        assert_eq!(*leader.state().borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connection_failure_is_error() {
        let relay = MemoryRelay::new();
        let session = Session::new(SessionConfig::default(), Arc::new(MemoryWorkspace::new()));

        let err = session
            .run(
                async { relay.connect(&PairingMode::Code("1-no-such".into())) },
                ManualChangeSource::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::InvalidCode(_))));
        assert_eq!(*session.state().borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_while_awaiting_peer() {
        let relay = MemoryRelay::new();
        let session = Session::new(SessionConfig::default(), Arc::new(MemoryWorkspace::new()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Already cancelled: the connect future loses the race or the wait does.
        let result = session
            .run(
                async { relay.connect(&PairingMode::NewChannel) },
                ManualChangeSource::new(),
                shutdown,
            )
            .await;
        match result {
            Ok(outcome) => assert_eq!(outcome.reason, CloseReason::Shutdown),
            Err(e) => assert!(matches!(e, SyncError::Cancelled)),
        }
        assert_eq!(relay.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_violation_while_paired_is_fatal() {
        let link = scripted(LinkState::Connected { peers: 2 });
        let session = Session::new(SessionConfig::default(), Arc::new(MemoryWorkspace::new()));
        let mut state = session.state();

        let transport = ScriptedTransport { link: link.clone() };
        let run = session.run(
            async move { Ok::<_, TransportError>(transport) },
            ManualChangeSource::new(),
            CancellationToken::new(),
        );
        let break_link = async {
            state.wait_for(|s| *s == SessionState::Paired).await.unwrap();
            link.send_replace(LinkState::Failed("unexpected generated_code".into()));
        };

        let (result, ()) = tokio::join!(run, break_link);
        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::ProtocolViolation(_)));
        assert!(err.is_fatal());
        assert_eq!(*session.state().borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_relay_violation_before_pairing_is_fatal() {
        let link = scripted(LinkState::Failed("unsupported protocol".into()));
        let session = Session::new(SessionConfig::default(), Arc::new(MemoryWorkspace::new()));

        let transport = ScriptedTransport { link };
        let err = session
            .run(
                async move { Ok::<_, TransportError>(transport) },
                ManualChangeSource::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(*session.state().borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_leaving_ends_session() {
        let relay = MemoryRelay::new();
        let host = relay.connect(&PairingMode::NewChannel).unwrap();
        let channel = host.channel_id();

        let session = Session::new(SessionConfig::default(), Arc::new(MemoryWorkspace::new()));
        let mut state = session.state();
        let run = session.run(
            async { relay.connect(&PairingMode::ChannelId(channel)) },
            ManualChangeSource::new(),
            CancellationToken::new(),
        );
        let leave = async {
            state.wait_for(|s| *s == SessionState::Paired).await.unwrap();
            host.close().await.unwrap();
        };

        let (outcome, ()) = tokio::join!(run, leave);
        assert_eq!(outcome.unwrap().reason, CloseReason::PeerLeft);
    }
}
