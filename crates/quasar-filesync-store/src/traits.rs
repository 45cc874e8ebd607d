//! Workspace trait: the abstract interface to the synced directory.
//!
//! This trait keeps the engine filesystem-agnostic. Implementations
//! include the real disk (primary) and in-memory (for tests).

use async_trait::async_trait;
use bytes::Bytes;

use quasar_filesync_core::{ContentHash, RelativePath};

use crate::error::Result;

/// Async access to the files under a synced root.
///
/// # Design Notes
///
/// - **Whole-file I/O**: reads return the full content, writes overwrite it.
/// - **Missing is not an error**: `read` returns `None` and `remove` succeeds
///   for paths that do not exist.
/// - **Parents on demand**: `write` creates any missing parent directories.
/// - **Dotfiles hidden**: `list` skips any path with a segment starting `.`.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Read the full content of `path`, or `None` if it does not exist.
    async fn read(&self, path: &RelativePath) -> Result<Option<Bytes>>;

    /// Overwrite `path` with `content`, creating parent directories.
    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()>;

    /// Remove `path`. Removing a missing file succeeds.
    async fn remove(&self, path: &RelativePath) -> Result<()>;

    /// List every regular file, sorted.
    async fn list(&self) -> Result<Vec<RelativePath>>;
}

/// Extension trait for hash-oriented workspace patterns.
#[async_trait]
pub trait WorkspaceExt: Workspace {
    /// Hash of the current content, or the empty hash when missing.
    async fn hash_of(&self, path: &RelativePath) -> Result<ContentHash> {
        Ok(self
            .read(path)
            .await?
            .map(|content| ContentHash::of(&content))
            .unwrap_or_else(ContentHash::empty))
    }

    /// Content and its hash; empty content for a missing file.
    async fn read_hashed(&self, path: &RelativePath) -> Result<(Bytes, ContentHash)> {
        let content = self.read(path).await?.unwrap_or_default();
        let hash = ContentHash::of(&content);
        Ok((content, hash))
    }

    /// Apply whole-file content: empty-hash content removes the file.
    async fn apply(&self, path: &RelativePath, content: &[u8], hash: &ContentHash) -> Result<()> {
        if hash.is_empty() {
            self.remove(path).await
        } else {
            self.write(path, content).await
        }
    }
}

impl<W: Workspace + ?Sized> WorkspaceExt for W {}

#[async_trait]
impl<W: Workspace + ?Sized> Workspace for std::sync::Arc<W> {
    async fn read(&self, path: &RelativePath) -> Result<Option<Bytes>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn remove(&self, path: &RelativePath) -> Result<()> {
        (**self).remove(path).await
    }

    async fn list(&self) -> Result<Vec<RelativePath>> {
        (**self).list().await
    }
}
