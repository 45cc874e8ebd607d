//! Error types for the store module.

use thiserror::Error;

use quasar_filesync_core::CoreError;

/// Errors that can occur reading or writing the synced directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the filesystem.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A path on disk could not be expressed as a relative path.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] CoreError),

    /// Directory walk failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
