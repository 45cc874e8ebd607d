//! Error types for the file sync core.

use thiserror::Error;

/// Errors from parsing and validating core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid role {0:?}: expected \"leader\" or \"follower\"")]
    InvalidRole(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("content hash mismatch for {path}: header says {expected}, content is {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{path} is too large to sync ({size} bytes)")]
    TooLarge { path: String, size: usize },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}
