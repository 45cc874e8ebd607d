//! The hash cache: what this party believes is currently synchronized.
//!
//! In-memory only; nothing survives a restart. The cache has no interior
//! locking. The engine owns it behind its own mutex, which is what serializes
//! every read and write.

use std::collections::HashMap;

use quasar_filesync_core::{ContentHash, RelativePath};

/// Per-path record of the last synchronized content hash.
#[derive(Debug, Clone, Default)]
pub struct HashCache {
    entries: HashMap<RelativePath, ContentHash>,
}

impl HashCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known hash for `path`, or the empty-content hash if never synced.
    pub fn get(&self, path: &RelativePath) -> ContentHash {
        self.entries
            .get(path)
            .copied()
            .unwrap_or_else(ContentHash::empty)
    }

    /// Record `hash` as the synchronized state of `path`.
    pub fn set(&mut self, path: RelativePath, hash: ContentHash) {
        self.entries.insert(path, hash);
    }

    /// Forget `path`. Equivalent to it holding the empty hash.
    pub fn delete(&mut self, path: &RelativePath) {
        self.entries.remove(path);
    }

    /// Whether an entry exists for `path`.
    pub fn contains(&self, path: &RelativePath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all recorded entries.
    pub fn iter(&self) -> impl Iterator<Item = (&RelativePath, &ContentHash)> {
        self.entries.iter()
    }
}
