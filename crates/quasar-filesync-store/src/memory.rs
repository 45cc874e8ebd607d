//! In-memory implementation of the Workspace trait.
//!
//! This is primarily for testing. It has the same semantics as the disk
//! workspace but keeps every file in a map with no persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use quasar_filesync_core::RelativePath;

use crate::error::Result;
use crate::traits::Workspace;

/// In-memory workspace.
///
/// All files are lost when the workspace is dropped.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: RwLock<BTreeMap<RelativePath, Bytes>>,
}

impl MemoryWorkspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workspace pre-populated with `files`.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<RelativePath>,
        C: Into<Bytes>,
    {
        let files = files
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        Self {
            files: RwLock::new(files),
        }
    }

    /// Snapshot of every file and its content.
    pub async fn snapshot(&self) -> BTreeMap<RelativePath, Bytes> {
        self.files.read().await.clone()
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read(&self, path: &RelativePath) -> Result<Option<Bytes>> {
        Ok(self.files.read().await.get(path).cloned())
    }

    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        self.files
            .write()
            .await
            .insert(path.clone(), Bytes::copy_from_slice(content));
        Ok(())
    }

    async fn remove(&self, path: &RelativePath) -> Result<()> {
        self.files.write().await.remove(path);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RelativePath>> {
        Ok(self
            .files
            .read()
            .await
            .keys()
            .filter(|path| !path.is_hidden())
            .cloned()
            .collect())
    }
}
