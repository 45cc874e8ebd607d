//! Local filesystem change events.

use std::path::PathBuf;

use crate::types::RelativePath;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Change,
    Delete,
}

/// A single observed change under the synced root.
///
/// Produced by a change source (including the initial backfill of existing
/// files), consumed once by the engine, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub absolute_path: PathBuf,
    pub relative_path: RelativePath,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, absolute_path: PathBuf, relative_path: RelativePath) -> Self {
        Self {
            kind,
            absolute_path,
            relative_path,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}
