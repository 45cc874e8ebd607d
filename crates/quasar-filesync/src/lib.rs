//! # Quasar File Sync
//!
//! Keep one directory identical on two machines through an untrusted relay.
//!
//! ## Overview
//!
//! One side runs as the leader, the other as the follower. Edits on either
//! side propagate as whole-file replaces; when both sides edit the same file
//! concurrently, the leader's version wins.
//!
//! - **Hashes** identify content; an empty or missing file has the empty hash
//! - **Pairing** goes through a short code handed out by the relay
//! - **Watching** uses the platform's native file notifications
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quasar_filesync::{FileSync, FileSyncConfig};
//! use quasar_filesync::core::Role;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() {
//!     let mut config = FileSyncConfig::default();
//!     config.url = "relay.example.com".into();
//!     config.directory = "./shared".into();
//!     config.session.role = Role::Leader;
//!
//!     let sync = FileSync::open(config).await.unwrap();
//!     let mut code = sync.pairing_code();
//!     tokio::spawn(async move {
//!         if let Ok(code) = code.wait_for(Option::is_some).await {
//!             println!("pairing code: {}", code.as_deref().unwrap_or_default());
//!         }
//!     });
//!     sync.run(CancellationToken::new()).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `quasar_filesync::core` - Paths, hashes and the wire message
//! - `quasar_filesync::store` - Hash cache and workspaces
//! - `quasar_filesync::sync` - Engine, transports and sessions

pub mod config;
pub mod error;
pub mod filesync;

pub use quasar_filesync_core as core;
pub use quasar_filesync_store as store;
pub use quasar_filesync_sync as sync;

pub use config::{Args, FileSyncConfig};
pub use error::{FileSyncError, Result};
pub use filesync::FileSync;

pub use quasar_filesync_core::{ContentHash, RelativePath, Role, SyncMessage};
pub use quasar_filesync_sync::{CloseReason, PairingMode, SessionOutcome, SessionState};
