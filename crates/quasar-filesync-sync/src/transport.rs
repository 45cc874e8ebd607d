//! Transport abstraction for the sync protocol.
//!
//! A transport carries opaque text messages between exactly two parties
//! that met on a relay channel. It reports the number of parties on the
//! channel through a [`watch`] channel so the session can react to peers
//! joining and leaving without polling.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

pub use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Callback receiving each inbound message.
pub type MessageHandler = Box<dyn Fn(String) + Send + Sync>;

/// Connectivity of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Connected; `peers` counts every party on the channel, including us.
    Connected { peers: usize },
    /// The link was closed by either side.
    Closed,
    /// The relay broke the protocol.
    Failed(String),
}

impl LinkState {
    /// Parties on the channel, zero when not connected.
    pub fn peers(&self) -> usize {
        match self {
            LinkState::Connected { peers } => *peers,
            _ => 0,
        }
    }

    /// Whether both parties are present.
    pub fn is_paired(&self) -> bool {
        self.peers() >= 2
    }

    /// Whether the link can no longer carry messages.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LinkState::Connected { .. })
    }
}

/// How to join a relay channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingMode {
    /// Open a fresh channel and hand out a pairing code.
    NewChannel,
    /// Join the channel a pairing code points at.
    Code(String),
    /// Join a channel by its identifier.
    ChannelId(String),
}

/// Transport trait for exchanging sync messages with the peer.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the other party.
    async fn send(&self, text: String) -> Result<()>;

    /// Install the inbound handler.
    ///
    /// Messages that arrived earlier are replayed to it in order.
    fn on_message(&self, handler: MessageHandler);

    /// Subscribe to link state changes.
    fn link_state(&self) -> watch::Receiver<LinkState>;

    /// Parties currently on the channel, including this one.
    fn peer_count(&self) -> usize {
        self.link_state().borrow().peers()
    }

    /// Ask the relay for a pairing code pointing at this channel.
    async fn generate_code(&self) -> Result<String>;

    /// Identifier of the joined channel.
    fn channel_id(&self) -> String;

    /// Leave the channel.
    async fn close(&self) -> Result<()>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Inbound buffer shared by transports.
///
/// Holds messages until a handler is installed, then forwards them.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
}

#[derive(Default)]
struct InboxState {
    handler: Option<MessageHandler>,
    pending: VecDeque<String>,
}

impl Inbox {
    pub(crate) fn deliver(&self, text: String) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        match &state.handler {
            Some(handler) => handler(text),
            None => state.pending.push_back(text),
        }
    }

    pub(crate) fn install(&self, handler: MessageHandler) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        for text in state.pending.drain(..) {
            handler(text);
        }
        state.handler = Some(handler);
    }
}

const CODE_WORDS: &[&str] = &[
    "acorn", "amber", "anchor", "apple", "arrow", "aspen", "badge", "bamboo", "basil", "beacon",
    "birch", "bison", "breeze", "bronze", "cactus", "canyon", "cedar", "cherry", "cobalt", "comet",
    "coral", "cotton", "crater", "dawn", "delta", "denim", "drift", "eagle", "ember", "falcon",
    "fern", "fjord", "flint", "forest", "galaxy", "garnet", "ginger", "glacier", "harbor", "hazel",
    "heron", "indigo", "island", "ivory", "jasper", "juniper", "kettle", "lagoon", "lantern",
    "lemon", "lilac", "maple", "marble", "meadow", "meteor", "mint", "nebula", "nectar", "oasis",
    "olive", "onyx", "orbit", "otter", "pebble", "pepper", "pine", "planet", "prairie", "quartz",
    "raven", "reef", "river", "saffron", "sierra", "silver", "spruce", "summit", "thistle",
    "thunder", "tulip", "tundra", "velvet", "violet", "walnut", "willow", "zephyr",
];

/// Number of distinct channel slots a pairing code can address.
pub const CODE_SLOTS: u8 = 100;

/// Build a pairing code `<slot>-<word>-<word>`.
pub fn format_code<R: rand::Rng + ?Sized>(slot: u8, rng: &mut R) -> String {
    use rand::seq::SliceRandom;
    let first = CODE_WORDS.choose(rng).copied().unwrap_or("quasar");
    let second = CODE_WORDS.choose(rng).copied().unwrap_or("relay");
    format!("{slot}-{first}-{second}")
}

/// The slot a pairing code addresses, if it is well formed.
pub fn code_slot(code: &str) -> Option<u8> {
    let mut parts = code.split('-');
    let slot: u8 = parts.next()?.parse().ok()?;
    let words: Vec<&str> = parts.collect();
    let valid_words = words.len() == 2
        && words
            .iter()
            .all(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase()));
    (slot < CODE_SLOTS && valid_words).then_some(slot)
}

/// An in-memory relay for testing.
///
/// Mirrors the rendezvous semantics of the WebSocket relay: channels hold
/// at most two parties and pairing codes are single-use.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Parties allowed on one channel.
    const CHANNEL_CAPACITY: usize = 2;

    struct PendingCode {
        code: String,
        channel: String,
    }

    struct Member {
        client: u64,
        inbox: Arc<Inbox>,
        link: watch::Sender<LinkState>,
    }

    struct Channel {
        id: String,
        members: Mutex<Vec<Member>>,
    }

    impl Channel {
        fn announce(members: &[Member]) {
            let peers = members.len();
            for member in members {
                member.link.send_replace(LinkState::Connected { peers });
            }
        }
    }

    struct RelayState {
        channels: HashMap<String, Arc<Channel>>,
        codes: HashMap<u8, PendingCode>,
        rng: StdRng,
        next_client: u64,
    }

    /// Shared state for an in-memory relay.
    pub struct MemoryRelay {
        state: Mutex<RelayState>,
    }

    impl MemoryRelay {
        /// Create a new relay.
        pub fn new() -> Arc<Self> {
            Self::with_rng(StdRng::from_entropy())
        }

        /// Create a relay whose codes and channel ids are reproducible.
        pub fn with_seed(seed: u64) -> Arc<Self> {
            Self::with_rng(StdRng::seed_from_u64(seed))
        }

        fn with_rng(rng: StdRng) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(RelayState {
                    channels: HashMap::new(),
                    codes: HashMap::new(),
                    rng,
                    next_client: 0,
                }),
            })
        }

        /// Join a channel the way `mode` asks.
        pub fn connect(self: &Arc<Self>, mode: &PairingMode) -> Result<MemoryTransport> {
            let mut state = lock(&self.state);
            let channel = match mode {
                PairingMode::NewChannel => {
                    let id = format!("{:032x}", state.rng.gen::<u128>());
                    let channel = Arc::new(Channel {
                        id: id.clone(),
                        members: Mutex::new(Vec::new()),
                    });
                    state.channels.insert(id, channel.clone());
                    channel
                }
                PairingMode::Code(code) => {
                    let slot =
                        code_slot(code).ok_or_else(|| TransportError::InvalidCode(code.clone()))?;
                    // Codes are single-use: any attempt on a slot consumes it.
                    let pending = state
                        .codes
                        .remove(&slot)
                        .ok_or_else(|| TransportError::InvalidCode(code.clone()))?;
                    if pending.code != *code {
                        return Err(TransportError::InvalidCode(code.clone()));
                    }
                    state
                        .channels
                        .get(&pending.channel)
                        .cloned()
                        .ok_or(TransportError::ChannelNotFound(pending.channel))?
                }
                PairingMode::ChannelId(id) => state
                    .channels
                    .get(id)
                    .cloned()
                    .ok_or_else(|| TransportError::ChannelNotFound(id.clone()))?,
            };

            let client = state.next_client;
            state.next_client += 1;
            drop(state);

            let inbox = Arc::new(Inbox::default());
            let (link, link_rx) = watch::channel(LinkState::Connected { peers: 1 });
            {
                let mut members = lock(&channel.members);
                if members.len() >= CHANNEL_CAPACITY {
                    return Err(TransportError::ChannelFull(channel.id.clone()));
                }
                members.push(Member {
                    client,
                    inbox: inbox.clone(),
                    link,
                });
                Channel::announce(&members);
            }
            tracing::debug!(channel = %channel.id, client, "joined memory channel");

            Ok(MemoryTransport {
                client,
                relay: Arc::clone(self),
                channel,
                inbox,
                link: link_rx,
                closed: AtomicBool::new(false),
            })
        }

        /// Number of open channels.
        pub fn channel_count(&self) -> usize {
            lock(&self.state).channels.len()
        }

        fn issue_code(&self, channel: &str) -> Result<String> {
            let mut state = lock(&self.state);
            let free: Vec<u8> = (0..CODE_SLOTS)
                .filter(|slot| !state.codes.contains_key(slot))
                .collect();
            if free.is_empty() {
                return Err(TransportError::NoCodesAvailable);
            }
            let slot = free[state.rng.gen_range(0..free.len())];
            let code = format_code(slot, &mut state.rng);
            state.codes.insert(
                slot,
                PendingCode {
                    code: code.clone(),
                    channel: channel.to_string(),
                },
            );
            Ok(code)
        }

        fn leave(&self, channel: &Arc<Channel>, client: u64) {
            let mut state = lock(&self.state);
            let mut members = lock(&channel.members);
            if let Some(idx) = members.iter().position(|m| m.client == client) {
                let member = members.remove(idx);
                member.link.send_replace(LinkState::Closed);
            }
            Channel::announce(&members);
            if members.is_empty() {
                state.channels.remove(&channel.id);
                state.codes.retain(|_, pending| pending.channel != channel.id);
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        client: u64,
        relay: Arc<MemoryRelay>,
        channel: Arc<Channel>,
        inbox: Arc<Inbox>,
        link: watch::Receiver<LinkState>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, text: String) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let members = lock(&self.channel.members);
            let mut delivered = false;
            for member in members.iter().filter(|m| m.client != self.client) {
                member.inbox.deliver(text.clone());
                delivered = true;
            }
            if !delivered {
                tracing::debug!(channel = %self.channel.id, "no peer on channel, message dropped");
            }
            Ok(())
        }

        fn on_message(&self, handler: MessageHandler) {
            self.inbox.install(handler);
        }

        fn link_state(&self) -> watch::Receiver<LinkState> {
            self.link.clone()
        }

        async fn generate_code(&self) -> Result<String> {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            self.relay.issue_code(&self.channel.id)
        }

        fn channel_id(&self) -> String {
            self.channel.id.clone()
        }

        async fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.relay.leave(&self.channel, self.client);
            }
            Ok(())
        }
    }

    impl Drop for MemoryTransport {
        fn drop(&mut self) {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.relay.leave(&self.channel, self.client);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRelay;
    use super::*;
    use std::sync::Arc;

    fn collector() -> (Arc<Mutex<Vec<String>>>, MessageHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |text| lock(&sink).push(text)))
    }

    #[test]
    fn test_code_slot_parsing() {
        assert_eq!(code_slot("42-amber-river"), Some(42));
        assert_eq!(code_slot("0-a-b"), Some(0));
        assert_eq!(code_slot("100-amber-river"), None);
        assert_eq!(code_slot("7-amber"), None);
        assert_eq!(code_slot("7-amber-river-extra"), None);
        assert_eq!(code_slot("x-amber-river"), None);
        assert_eq!(code_slot("7--river"), None);
    }

    #[test]
    fn test_format_code_is_parseable() {
        let mut rng = rand::thread_rng();
        for slot in [0, 9, 99] {
            let code = format_code(slot, &mut rng);
            assert_eq!(code_slot(&code), Some(slot));
        }
    }

    #[tokio::test]
    async fn test_memory_pairing_by_code() {
        let relay = MemoryRelay::with_seed(7);
        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        assert_eq!(a.peer_count(), 1);

        let code = a.generate_code().await.unwrap();
        let b = relay.connect(&PairingMode::Code(code.clone())).unwrap();

        assert_eq!(a.peer_count(), 2);
        assert_eq!(b.peer_count(), 2);
        assert_eq!(a.channel_id(), b.channel_id());

        // Single use.
        let err = relay.connect(&PairingMode::Code(code)).err().unwrap();
        assert!(matches!(err, TransportError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn test_memory_send_and_buffer_before_handler() {
        let relay = MemoryRelay::with_seed(1);
        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        let b = relay
            .connect(&PairingMode::ChannelId(a.channel_id()))
            .unwrap();

        a.send("one".into()).await.unwrap();
        a.send("two".into()).await.unwrap();

        let (seen, handler) = collector();
        b.on_message(handler);
        a.send("three".into()).await.unwrap();

        assert_eq!(*lock(&seen), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_memory_sender_does_not_hear_itself() {
        let relay = MemoryRelay::new();
        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        let (seen, handler) = collector();
        a.on_message(handler);

        a.send("echo?".into()).await.unwrap();
        assert!(lock(&seen).is_empty());
    }

    #[tokio::test]
    async fn test_memory_rejects_bad_code_and_full_channel() {
        let relay = MemoryRelay::new();
        assert!(matches!(
            relay.connect(&PairingMode::Code("not-a-code".into())),
            Err(TransportError::InvalidCode(_))
        ));
        assert!(matches!(
            relay.connect(&PairingMode::Code("5-amber-river".into())),
            Err(TransportError::InvalidCode(_))
        ));

        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        let _b = relay
            .connect(&PairingMode::ChannelId(a.channel_id()))
            .unwrap();
        assert!(matches!(
            relay.connect(&PairingMode::ChannelId(a.channel_id())),
            Err(TransportError::ChannelFull(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_close_notifies_peer() {
        let relay = MemoryRelay::new();
        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        let b = relay
            .connect(&PairingMode::ChannelId(a.channel_id()))
            .unwrap();
        let mut b_link = b.link_state();
        assert!(b_link.borrow_and_update().is_paired());

        a.close().await.unwrap();
        b_link.changed().await.unwrap();
        assert_eq!(*b_link.borrow(), LinkState::Connected { peers: 1 });
        assert_eq!(*a.link_state().borrow(), LinkState::Closed);
        assert!(matches!(a.send("late".into()).await, Err(TransportError::Closed)));

        drop(b);
        assert_eq!(relay.channel_count(), 0);
    }
}
