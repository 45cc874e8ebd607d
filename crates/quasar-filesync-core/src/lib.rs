//! # Quasar File Sync Core
//!
//! Pure primitives for two-party directory sync: content hashes, validated
//! relative paths, roles, change events and the wire message.
//!
//! This crate does no I/O.
//!
//! ## Key Types
//!
//! - [`ContentHash`] - BLAKE3 digest of a file's contents
//! - [`RelativePath`] - Forward-slash path that cannot escape the synced root
//! - [`Role`] - Leader or follower, fixed per session
//! - [`ChangeEvent`] - A local add/change/delete
//! - [`SyncMessage`] - The JSON message exchanged between parties

pub mod error;
pub mod event;
pub mod hash;
pub mod message;
pub mod types;

pub use error::CoreError;
pub use event::{ChangeEvent, ChangeKind};
pub use hash::ContentHash;
pub use message::{limits, FileChange, SyncMessage};
pub use types::{RelativePath, Role};
