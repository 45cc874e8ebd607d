//! Convergence verification for the sync protocol.
//!
//! After both sides go quiet, every path should hash the same on each side
//! and each cache entry should match the file it describes. A missing file
//! and an empty file are the same state.

use std::collections::BTreeSet;

use quasar_filesync_core::{ContentHash, RelativePath};
use quasar_filesync_store::{HashCache, Workspace, WorkspaceExt};

use crate::error::Result;

/// A path whose two hashes disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub path: RelativePath,
    pub local: ContentHash,
    pub remote: ContentHash,
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Every path matches.
    Converged,
    /// Some paths differ.
    Diverged { paths: Vec<Divergence> },
}

impl ConvergenceResult {
    /// Check if converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    fn from_divergences(paths: Vec<Divergence>) -> Self {
        if paths.is_empty() {
            ConvergenceResult::Converged
        } else {
            ConvergenceResult::Diverged { paths }
        }
    }
}

/// Compare two workspaces path by path.
pub async fn verify_convergence<A, B>(local: &A, remote: &B) -> Result<ConvergenceResult>
where
    A: Workspace + ?Sized,
    B: Workspace + ?Sized,
{
    let mut paths: BTreeSet<RelativePath> = local.list().await?.into_iter().collect();
    paths.extend(remote.list().await?);

    let mut diverged = Vec::new();
    for path in paths {
        let local_hash = local.hash_of(&path).await?;
        let remote_hash = remote.hash_of(&path).await?;
        if local_hash != remote_hash {
            diverged.push(Divergence {
                path,
                local: local_hash,
                remote: remote_hash,
            });
        }
    }
    Ok(ConvergenceResult::from_divergences(diverged))
}

/// Compare a cache against the workspace it describes.
///
/// `remote` in each [`Divergence`] is the cached hash.
pub async fn verify_cache<W: Workspace + ?Sized>(
    workspace: &W,
    cache: &HashCache,
) -> Result<ConvergenceResult> {
    let mut paths: BTreeSet<RelativePath> = workspace.list().await?.into_iter().collect();
    paths.extend(cache.iter().map(|(path, _)| path.clone()));

    let mut diverged = Vec::new();
    for path in paths {
        let actual = workspace.hash_of(&path).await?;
        let cached = cache.get(&path);
        if actual != cached {
            diverged.push(Divergence {
                path,
                local: actual,
                remote: cached,
            });
        }
    }
    Ok(ConvergenceResult::from_divergences(diverged))
}

/// Digest of a whole workspace.
///
/// Rolling BLAKE3 over `(path, content hash)` in path order, skipping empty
/// files. Two converged workspaces have equal digests.
pub async fn workspace_digest<W: Workspace + ?Sized>(workspace: &W) -> Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"quasar-filesync-state-v1:");
    for path in workspace.list().await? {
        let hash = workspace.hash_of(&path).await?;
        if hash.is_empty() {
            continue;
        }
        hasher.update(path.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }
    Ok(ContentHash::from_bytes(*hasher.finalize().as_bytes()))
}
