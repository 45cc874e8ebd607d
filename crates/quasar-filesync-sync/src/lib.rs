//! # Quasar File Sync Engine
//!
//! Two-party directory synchronization through an untrusted relay.
//!
//! ## Overview
//!
//! One party is the **leader**, the other the **follower**. Each local edit
//! is sent as a whole-file replace carrying the hash the sender believes the
//! peer holds (`old_hash`) and the new content. The follower applies every
//! change it receives. The leader applies a change only if `old_hash`
//! matches its own file; otherwise it sends its own content back. Both sides
//! end up with the leader's version of any contested file.
//!
//! ## Key Types
//!
//! - [`MessageQueue`] - FIFO buffer between the transport callback and the engine
//! - [`Transport`] - Text message link to the peer ([`MemoryRelay`], [`RelayTransport`])
//! - [`SyncEngine`] - Local change and remote message handling
//! - [`DirectoryWatcher`] - `notify`-based [`ChangeSource`]
//! - [`Session`] - Connect, pair, sync, close
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quasar_filesync_core::Role;
//! use quasar_filesync_store::DiskWorkspace;
//! use quasar_filesync_sync::{
//!     DirectoryWatcher, PairingMode, RelayConfig, RelayTransport, Session, SessionConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() {
//!     let workspace = Arc::new(DiskWorkspace::open("./shared").await.unwrap());
//!     let watcher = DirectoryWatcher::new(workspace.root());
//!     let config = SessionConfig {
//!         role: Role::Leader,
//!         pairing: PairingMode::NewChannel,
//!         queue_capacity: None,
//!     };
//!
//!     let session = Session::new(config.clone(), workspace);
//!     let connect = RelayTransport::connect("relay.example.com", &config.pairing, RelayConfig::default());
//!     let outcome = session.run(connect, watcher, CancellationToken::new()).await.unwrap();
//!     println!("sent {} changes", outcome.report.sent);
//! }
//! ```

pub mod convergence;
pub mod engine;
pub mod error;
pub mod messages;
pub mod queue;
pub mod relay;
pub mod session;
pub mod transport;
pub mod watcher;

pub use convergence::{
    verify_cache, verify_convergence, workspace_digest, ConvergenceResult, Divergence,
};
pub use engine::{Outcome, SyncEngine, SyncReport};
pub use error::{Result, SyncError, TransportError};
pub use messages::{ClientId, RelayEvent, RelayRequest, PROTOCOL_VERSION};
pub use queue::{MessageQueue, QueueError};
pub use relay::{connection_url, RelayConfig, RelayTransport};
pub use session::{CloseReason, Session, SessionConfig, SessionOutcome, SessionState};
pub use transport::{
    memory::MemoryRelay, memory::MemoryTransport, LinkState, MessageHandler, PairingMode,
    Transport,
};
pub use watcher::{map_event, ChangeSource, DirectoryWatcher, ManualChangeSource};
