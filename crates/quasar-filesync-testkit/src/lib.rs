//! # Quasar File Sync Testkit
//!
//! Testing utilities for Quasar file sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a leader and follower paired over the in-memory relay,
//!   driven one message at a time
//! - **Generators**: Proptest strategies for paths, contents and edit scripts
//!
//! ## Test Fixtures
//!
//! ```rust
//! use quasar_filesync_testkit::SyncPair;
//!
//! # tokio_test_block_on(async {
//! let pair = SyncPair::with_files(&[("a.txt", b"hello")], &[("a.txt", b"world")]);
//! pair.announce_all().await.unwrap();
//! pair.settle().await.unwrap();
//! assert!(pair.convergence().await.unwrap().is_converged());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use quasar_filesync_testkit::generators::concurrent_script;
//!
//! proptest! {
//!     #[test]
//!     fn pair_converges(steps in concurrent_script(32)) {
//!         // apply each step to a SyncPair, settle, then compare
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{connect_pair, Party, SyncPair};
pub use generators::{concurrent_script, sequential_script, Step};
