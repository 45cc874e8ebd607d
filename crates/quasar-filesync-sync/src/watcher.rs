//! Local change detection.
//!
//! [`DirectoryWatcher`] turns `notify` events into [`ChangeEvent`]s and
//! reports every file already present when it starts, so a fresh session
//! announces the whole directory.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use quasar_filesync_core::{ChangeEvent, ChangeKind, RelativePath};
use quasar_filesync_store::list_files;

use crate::error::{Result, SyncError};

/// A stream of local change events.
pub trait ChangeSource: Send {
    /// Begin producing events.
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>>;

    /// Stop producing events. Idempotent.
    fn stop(&mut self);
}

/// Recursive watcher over a synced root.
pub struct DirectoryWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Watch `root`, which should already be canonical.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watcher: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChangeSource for DirectoryWatcher {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        if self.watcher.is_some() {
            return Err(SyncError::Watch(notify::Error::generic(
                "watcher already started",
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let events = tx.clone();
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in map_event(&root, &event) {
                    if events.send(change).is_err() {
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        // Registered before the scan so nothing written in between is missed.
        let existing = list_files(&self.root)?;
        tracing::info!(root = %self.root.display(), files = existing.len(), "watching directory");
        for path in existing {
            let absolute = path.to_path(&self.root);
            let _ = tx.send(ChangeEvent::new(ChangeKind::Add, absolute, path));
        }

        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!(root = %self.root.display(), "stopped watching");
        }
    }
}

/// Map one `notify` event onto change events under `root`.
///
/// Dotfiles produce nothing. A directory appearing reports every file
/// inside it. A directory going away is reported as one delete for the
/// directory itself, since its contents can no longer be listed; the engine
/// expands it from its cache.
pub fn map_event(root: &Path, event: &Event) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => {
            for path in paths {
                push_added(root, path, &mut changes);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in paths {
                    push(root, ChangeKind::Delete, path, &mut changes);
                }
            }
            RenameMode::To => {
                for path in paths {
                    push_added(root, path, &mut changes);
                }
            }
            RenameMode::Both => {
                if let Some(from) = paths.first() {
                    push(root, ChangeKind::Delete, from, &mut changes);
                }
                if let Some(to) = paths.get(1) {
                    push_added(root, to, &mut changes);
                }
            }
            _ => {
                for path in paths {
                    if path.exists() {
                        push_added(root, path, &mut changes);
                    } else {
                        push(root, ChangeKind::Delete, path, &mut changes);
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in paths.iter().filter(|p| !p.is_dir()) {
                push(root, ChangeKind::Change, path, &mut changes);
            }
        }
        EventKind::Remove(_) => {
            for path in paths {
                push(root, ChangeKind::Delete, path, &mut changes);
            }
        }
        _ => {}
    }

    changes
}

fn push_added(root: &Path, path: &Path, out: &mut Vec<ChangeEvent>) {
    if !path.is_dir() {
        push(root, ChangeKind::Add, path, out);
        return;
    }
    match list_files(path) {
        Ok(files) => {
            for file in files {
                push(root, ChangeKind::Add, &file.to_path(path), out);
            }
        }
        Err(e) => tracing::warn!(dir = %path.display(), error = %e, "cannot scan new directory"),
    }
}

fn push(root: &Path, kind: ChangeKind, path: &Path, out: &mut Vec<ChangeEvent>) {
    match RelativePath::from_path(root, path) {
        Ok(relative) if !relative.is_hidden() => {
            out.push(ChangeEvent::new(kind, path.to_path_buf(), relative));
        }
        Ok(_) => {}
        Err(e) => tracing::trace!(path = %path.display(), error = %e, "ignoring path"),
    }
}

/// Change source fed by hand, for tests and embedding.
pub struct ManualChangeSource {
    sender: mpsc::UnboundedSender<ChangeEvent>,
    receiver: Option<mpsc::UnboundedReceiver<ChangeEvent>>,
}

impl ManualChangeSource {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }

    /// Handle for injecting events.
    pub fn sender(&self) -> mpsc::UnboundedSender<ChangeEvent> {
        self.sender.clone()
    }
}

impl Default for ManualChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSource for ManualChangeSource {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.receiver.take().ok_or_else(|| {
            SyncError::Watch(notify::Error::generic("change source already started"))
        })
    }

    fn stop(&mut self) {}
}
