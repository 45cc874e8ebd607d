//! Wire messages exchanged between the two parties.
//!
//! One JSON object per transport frame:
//!
//! ```text
//! { "type": "file_sync",
//!   "change": { "type": "replace",
//!               "relativePath": "docs/a.txt",
//!               "oldHash": "<hex>", "newHash": "<hex>",
//!               "content": "<base64>" } }
//! ```
//!
//! Deletion is a replace to empty content whose `newHash` is
//! [`ContentHash::empty`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::ContentHash;
use crate::types::RelativePath;

/// Message size limits.
pub mod limits {
    /// Largest file content carried in a single message.
    pub const MAX_FILE_BYTES: usize = 64 * 1024 * 1024;
}

/// Top-level sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// A whole-file change for one path.
    FileSync { change: FileChange },
}

/// The change carried by a [`SyncMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileChange {
    /// Replace the receiver's content at `relative_path`.
    #[serde(rename_all = "camelCase")]
    Replace {
        relative_path: RelativePath,
        /// The sender's belief of the receiver's current hash.
        old_hash: ContentHash,
        /// Hash of `content`.
        new_hash: ContentHash,
        #[serde(with = "base64_content")]
        content: Bytes,
    },
}

impl SyncMessage {
    /// Build a replace message.
    pub fn replace(
        relative_path: RelativePath,
        old_hash: ContentHash,
        new_hash: ContentHash,
        content: Bytes,
    ) -> Self {
        SyncMessage::FileSync {
            change: FileChange::Replace {
                relative_path,
                old_hash,
                new_hash,
                content,
            },
        }
    }

    pub fn change(&self) -> &FileChange {
        match self {
            SyncMessage::FileSync { change } => change,
        }
    }

    pub fn into_change(self) -> FileChange {
        match self {
            SyncMessage::FileSync { change } => change,
        }
    }

    /// Serialize to the JSON text sent over the transport.
    pub fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Parse JSON text received from the transport.
    pub fn decode(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::DecodingError(e.to_string()))
    }

    /// Check the path is visible, the size limit, and that the content
    /// matches `new_hash`.
    ///
    /// Dotfiles are never watched, so a change to one could never be
    /// reconciled afterwards.
    pub fn validate(&self) -> Result<(), CoreError> {
        let change = self.change();
        if change.relative_path().is_hidden() {
            return Err(CoreError::InvalidPath(format!(
                "hidden path: {}",
                change.relative_path()
            )));
        }
        if change.content().len() > limits::MAX_FILE_BYTES {
            return Err(CoreError::TooLarge {
                path: change.relative_path().to_string(),
                size: change.content().len(),
            });
        }
        let actual = ContentHash::of(change.content());
        if actual != *change.new_hash() {
            return Err(CoreError::HashMismatch {
                path: change.relative_path().to_string(),
                expected: change.new_hash().to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

impl FileChange {
    pub fn relative_path(&self) -> &RelativePath {
        match self {
            FileChange::Replace { relative_path, .. } => relative_path,
        }
    }

    pub fn old_hash(&self) -> &ContentHash {
        match self {
            FileChange::Replace { old_hash, .. } => old_hash,
        }
    }

    pub fn new_hash(&self) -> &ContentHash {
        match self {
            FileChange::Replace { new_hash, .. } => new_hash,
        }
    }

    pub fn content(&self) -> &Bytes {
        match self {
            FileChange::Replace { content, .. } => content,
        }
    }

    /// A replace to empty content removes the file.
    pub fn is_delete(&self) -> bool {
        self.new_hash().is_empty()
    }
}

mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
