//! Error types for the sync module.

use thiserror::Error;

use quasar_filesync_core::CoreError;
use quasar_filesync_store::StoreError;

/// Longest slice of an offending message kept in an error.
const MAX_RAW_LEN: usize = 256;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach or handshake with the relay.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Relay speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, relay={relay}")]
    VersionMismatch { local: u32, relay: u32 },

    /// Pairing code unknown, already used, or malformed.
    #[error("invalid pairing code: {0}")]
    InvalidCode(String),

    /// No channel with this identifier.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel already has two parties.
    #[error("channel {0} is full")]
    ChannelFull(String),

    /// Every pairing slot is taken.
    #[error("no pairing codes available")]
    NoCodesAvailable,

    /// A pairing code request is already outstanding.
    #[error("a pairing code request is already in progress")]
    CodeRequestPending,

    /// The relay broke the protocol (e.g. an unsolicited pairing code).
    #[error("relay protocol violation: {0}")]
    Protocol(String),

    /// Timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The link is closed.
    #[error("transport closed")]
    Closed,
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote message could not be parsed or validated.
    #[error("invalid message ({reason}): {raw}")]
    InvalidMessage { reason: String, raw: String },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Filesystem operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Local value could not be encoded or validated.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Directory watcher failed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The two endpoints are not in the state the engine assumes.
    #[error("protocol invariant violated: {0}")]
    ProtocolViolation(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Build an [`SyncError::InvalidMessage`] keeping a bounded prefix of the raw text.
    pub fn invalid_message(reason: impl std::fmt::Display, raw: &str) -> Self {
        let raw = match raw.char_indices().nth(MAX_RAW_LEN) {
            Some((idx, _)) => format!("{}...", &raw[..idx]),
            None => raw.to_string(),
        };
        SyncError::InvalidMessage {
            reason: reason.to_string(),
            raw,
        }
    }

    /// Whether the session must end.
    ///
    /// Everything else is logged and the offending change dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ProtocolViolation(_)
                | SyncError::Transport(TransportError::Protocol(_))
                | SyncError::Transport(TransportError::VersionMismatch { .. })
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
