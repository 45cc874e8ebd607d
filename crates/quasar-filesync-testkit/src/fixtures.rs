//! Test fixtures and helpers.
//!
//! A [`SyncPair`] is a leader and a follower wired together through a
//! [`MemoryRelay`], with in-memory workspaces. Nothing runs in the
//! background: tests edit files and deliver messages step by step, which
//! makes every interleaving reproducible.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use quasar_filesync_core::{ChangeEvent, ChangeKind, RelativePath, Role};
use quasar_filesync_store::{MemoryWorkspace, Workspace};
use quasar_filesync_sync::{
    verify_cache, verify_convergence, ConvergenceResult, MemoryRelay, MemoryTransport,
    MessageQueue, Outcome, PairingMode, Result, SyncEngine, Transport,
};

use crate::generators::Step;

/// Upper bound on messages [`SyncPair::settle`] will process.
const SETTLE_LIMIT: usize = 10_000;

/// One side of a [`SyncPair`].
pub struct Party {
    pub role: Role,
    pub workspace: Arc<MemoryWorkspace>,
    pub engine: SyncEngine<MemoryWorkspace, MemoryTransport>,
    pub inbox: Arc<MessageQueue<String>>,
}

impl Party {
    fn new(role: Role, workspace: MemoryWorkspace, transport: MemoryTransport) -> Self {
        let inbox = Arc::new(MessageQueue::unbounded());
        let sink = inbox.clone();
        transport.on_message(Box::new(move |text| {
            let _ = sink.push(text);
        }));
        let workspace = Arc::new(workspace);
        Self {
            role,
            engine: SyncEngine::new(role, workspace.clone(), Arc::new(transport)),
            workspace,
            inbox,
        }
    }

    /// Write a file and report it, as the watcher would.
    pub async fn write(&self, path: &str, content: &[u8]) -> Result<Outcome> {
        let path = RelativePath::new(path)?;
        self.workspace.write(&path, content).await?;
        self.notify(ChangeKind::Change, path).await
    }

    /// Delete a file and report it.
    pub async fn delete(&self, path: &str) -> Result<Outcome> {
        let path = RelativePath::new(path)?;
        self.workspace.remove(&path).await?;
        self.notify(ChangeKind::Delete, path).await
    }

    /// Report every existing file, as a freshly started watcher does.
    pub async fn announce_all(&self) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::new();
        for path in self.workspace.list().await? {
            outcomes.push(self.notify(ChangeKind::Add, path).await?);
        }
        Ok(outcomes)
    }

    /// Process the oldest pending message, if any.
    ///
    /// A write caused by the message is echoed back as a local event, the
    /// way a real watcher reports the engine's own writes.
    pub async fn deliver_one(&self) -> Option<Result<Outcome>> {
        let text = self.inbox.try_next()?;
        let outcome = self.engine.handle_remote_message(&text).await;
        if let Ok(Outcome::Applied { path, .. }) = &outcome {
            if let Err(e) = self.notify(ChangeKind::Change, path.clone()).await {
                return Some(Err(e));
            }
        }
        Some(outcome)
    }

    /// Process up to `count` pending messages; returns how many ran.
    pub async fn deliver(&self, count: usize) -> Result<usize> {
        let mut delivered = 0;
        while delivered < count {
            match self.deliver_one().await {
                Some(outcome) => {
                    outcome?;
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    /// Content of `path`, or `None` when missing.
    pub async fn read(&self, path: &str) -> Option<Bytes> {
        let path = RelativePath::new(path).ok()?;
        self.workspace.read(&path).await.ok().flatten()
    }

    async fn notify(&self, kind: ChangeKind, path: RelativePath) -> Result<Outcome> {
        let event = ChangeEvent::new(kind, PathBuf::from(path.as_str()), path);
        self.engine.handle_local_change(&event).await
    }
}

/// A paired leader and follower.
pub struct SyncPair {
    pub relay: Arc<MemoryRelay>,
    pub leader: Party,
    pub follower: Party,
}

impl SyncPair {
    /// Two empty workspaces.
    pub fn new() -> Self {
        Self::with_workspaces(MemoryWorkspace::new(), MemoryWorkspace::new())
    }

    /// Start from the given leader and follower files.
    pub fn with_files<L, F>(leader: &[(&str, L)], follower: &[(&str, F)]) -> Self
    where
        L: AsRef<[u8]>,
        F: AsRef<[u8]>,
    {
        Self::with_workspaces(workspace_from(leader), workspace_from(follower))
    }

    fn with_workspaces(leader: MemoryWorkspace, follower: MemoryWorkspace) -> Self {
        let relay = MemoryRelay::with_seed(0x5eed);
        let (leader_link, follower_link) = connect_pair(&relay);
        Self {
            leader: Party::new(Role::Leader, leader, leader_link),
            follower: Party::new(Role::Follower, follower, follower_link),
            relay,
        }
    }

    /// The party playing `role`.
    pub fn party(&self, role: Role) -> &Party {
        match role {
            Role::Leader => &self.leader,
            Role::Follower => &self.follower,
        }
    }

    /// Both sides announce their existing files, as at session start.
    pub async fn announce_all(&self) -> Result<()> {
        self.leader.announce_all().await?;
        self.follower.announce_all().await?;
        Ok(())
    }

    /// Run one scripted step.
    pub async fn apply(&self, step: &Step) -> Result<()> {
        match step {
            Step::Write {
                role,
                path,
                content,
            } => {
                self.party(*role).write(path, content).await?;
            }
            Step::Delete { role, path } => {
                self.party(*role).delete(path).await?;
            }
            Step::Deliver { role, count } => {
                self.party(*role).deliver(*count).await?;
            }
        }
        Ok(())
    }

    /// Deliver messages alternately until neither side has any pending.
    ///
    /// Returns the number processed.
    ///
    /// # Panics
    ///
    /// If the exchange does not go quiet within a fixed message budget.
    pub async fn settle(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            for party in [&self.leader, &self.follower] {
                if let Some(outcome) = party.deliver_one().await {
                    outcome?;
                    processed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(processed);
            }
            assert!(processed < SETTLE_LIMIT, "sync pair did not settle");
        }
    }

    /// Compare the two workspaces.
    pub async fn convergence(&self) -> Result<ConvergenceResult> {
        verify_convergence(self.leader.workspace.as_ref(), self.follower.workspace.as_ref()).await
    }

    /// Check both caches against their workspaces.
    pub async fn caches_consistent(&self) -> Result<bool> {
        for party in [&self.leader, &self.follower] {
            let cache = party.engine.cache().await;
            if !verify_cache(party.workspace.as_ref(), &cache)
                .await?
                .is_converged()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Default for SyncPair {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a channel on `relay` and join it, returning (first, second).
pub fn connect_pair(relay: &Arc<MemoryRelay>) -> (MemoryTransport, MemoryTransport) {
    let first = relay
        .connect(&PairingMode::NewChannel)
        .expect("memory relay opens channels");
    let second = relay
        .connect(&PairingMode::ChannelId(first.channel_id()))
        .expect("fresh channel has room");
    (first, second)
}

fn workspace_from<C: AsRef<[u8]>>(files: &[(&str, C)]) -> MemoryWorkspace {
    MemoryWorkspace::with_files(files.iter().map(|(path, content)| {
        (
            RelativePath::new(*path).expect("fixture path is valid"),
            Bytes::copy_from_slice(content.as_ref()),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_starts_converged() {
        let pair = SyncPair::new();
        assert!(pair.convergence().await.unwrap().is_converged());
        assert_eq!(pair.settle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_reaches_other_side() {
        let pair = SyncPair::new();
        pair.leader.write("x.txt", b"x").await.unwrap();
        assert_eq!(pair.settle().await.unwrap(), 1);
        assert_eq!(pair.follower.read("x.txt").await.unwrap().as_ref(), b"x");
        assert!(pair.caches_consistent().await.unwrap());
    }

    #[tokio::test]
    async fn test_echo_is_suppressed() {
        let pair = SyncPair::new();
        pair.follower.write("e.txt", b"1").await.unwrap();
        pair.settle().await.unwrap();

        let report = pair.leader.engine.report().await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.sent, 0);
    }
}
