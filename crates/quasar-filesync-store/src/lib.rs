//! # Quasar File Sync Store
//!
//! Local state for file sync: the in-memory [`HashCache`] and the
//! [`Workspace`] abstraction over the synced directory.
//!
//! ## Overview
//!
//! The engine never touches `std::fs` directly. It reads and writes through
//! the [`Workspace`] trait, so the same protocol code runs against the real
//! disk ([`DiskWorkspace`]) and against [`MemoryWorkspace`] in tests.
//!
//! ## Key Types
//!
//! - [`HashCache`] - Path to last-synchronized hash; absent means empty
//! - [`Workspace`] - The async trait for whole-file reads, writes and removes
//! - [`WorkspaceExt`] - Hashing helpers built on [`Workspace`]
//! - [`DiskWorkspace`] - `tokio::fs` backed directory
//! - [`MemoryWorkspace`] - In-memory files for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quasar_filesync_core::RelativePath;
//! use quasar_filesync_store::{DiskWorkspace, Workspace, WorkspaceExt};
//!
//! async fn example() {
//!     let ws = DiskWorkspace::open("./shared").await.unwrap();
//!     let path = RelativePath::new("notes/today.md").unwrap();
//!
//!     ws.write(&path, b"# Today").await.unwrap();
//!     let hash = ws.hash_of(&path).await.unwrap();
//!     println!("{path} -> {hash}");
//! }
//! ```

pub mod cache;
pub mod disk;
pub mod error;
pub mod memory;
pub mod traits;

pub use cache::HashCache;
pub use disk::{list_files, DiskWorkspace};
pub use error::{Result, StoreError};
pub use memory::MemoryWorkspace;
pub use traits::{Workspace, WorkspaceExt};
