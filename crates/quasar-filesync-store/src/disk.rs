//! On-disk implementation of the Workspace trait.
//!
//! This is the primary backend. File I/O goes through `tokio::fs`; the
//! recursive listing runs `walkdir` inside `spawn_blocking` to keep the
//! runtime responsive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use walkdir::WalkDir;

use quasar_filesync_core::RelativePath;

use crate::error::{Result, StoreError};
use crate::traits::Workspace;

/// A synced directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DiskWorkspace {
    root: PathBuf,
}

impl DiskWorkspace {
    /// Open the directory at `root`, creating it if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| StoreError::io(root.display(), e))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| StoreError::io(root.display(), e))?;
        Ok(Self { root })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &RelativePath) -> PathBuf {
        path.to_path(&self.root)
    }
}

#[async_trait]
impl Workspace for DiskWorkspace {
    async fn read(&self, path: &RelativePath) -> Result<Option<Bytes>> {
        let full = self.resolve(path);
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(path, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        tracing::trace!(%path, bytes = content.len(), "wrote file");
        Ok(())
    }

    async fn remove(&self, path: &RelativePath) -> Result<()> {
        let full = self.resolve(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                tracing::trace!(%path, "removed file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<RelativePath>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_files(&root))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Walk `root` and collect every visible regular file.
pub fn list_files(root: &Path) -> Result<Vec<RelativePath>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_name(entry.file_name()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match RelativePath::from_path(root, entry.path()) {
            Ok(path) => files.push(path),
            Err(e) => tracing::warn!("skipping {}: {}", entry.path().display(), e),
        }
    }

    files.sort();
    Ok(files)
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}
