//! Error types for the file sync facade.

use quasar_filesync_core::CoreError;
use quasar_filesync_store::StoreError;
use quasar_filesync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while setting up or running file sync.
#[derive(Debug, Error)]
pub enum FileSyncError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Core error (e.g. an unknown role).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for file sync operations.
pub type Result<T> = std::result::Result<T, FileSyncError>;
