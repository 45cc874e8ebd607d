//! Sync engine: the leader/follower replace protocol.
//!
//! Both parties keep a [`HashCache`] of the last hash they believe the peer
//! holds for each path. Local edits are announced with that hash as
//! `old_hash`. A follower applies whatever arrives. The leader applies a
//! change only when `old_hash` matches its own content, and otherwise
//! answers with its own content so the follower falls back in line.
//!
//! ```text
//! Follower                              Leader
//!   |-- replace(old=H0, new=H2) -------->|   disk = H0: apply, cache H2
//!   |                                    |   disk = H2: already in sync
//!   |<------- replace(old=H2, new=H1) ---|   otherwise: override with H1
//! ```
//!
//! Every operation holds the engine lock from start to finish, so a local
//! event and a remote message touching the same path never interleave.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use quasar_filesync_core::{
    ChangeEvent, ChangeKind, ContentHash, FileChange, RelativePath, Role, SyncMessage,
};
use quasar_filesync_store::{HashCache, Workspace, WorkspaceExt};

use crate::error::{Result, SyncError};
use crate::queue::MessageQueue;
use crate::transport::Transport;

/// Counters describing what an engine has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local changes announced to the peer.
    pub sent: usize,
    /// Local events whose hash the peer already had.
    pub suppressed: usize,
    /// Remote changes written to the workspace.
    pub applied: usize,
    /// Remote changes the leader answered with its own content.
    pub overridden: usize,
    /// Remote changes the leader already had.
    pub already_in_sync: usize,
    /// Remote messages dropped as malformed.
    pub rejected: usize,
    /// Local or remote changes dropped after an I/O or transport error.
    pub failed: usize,
}

/// What one engine operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A local change was sent.
    Sent {
        path: RelativePath,
        new_hash: ContentHash,
    },
    /// A local event carried nothing new.
    Suppressed { path: RelativePath },
    /// A remote change was written locally.
    Applied {
        path: RelativePath,
        hash: ContentHash,
    },
    /// The leader rejected a remote change and sent its own content back.
    Overridden {
        path: RelativePath,
        hash: ContentHash,
    },
    /// The leader already held the proposed content.
    AlreadyInSync { path: RelativePath },
    /// A directory went away; each synced file inside it was announced.
    DirectoryRemoved {
        path: RelativePath,
        /// Files announced as deleted.
        sent: usize,
    },
}

struct EngineState {
    cache: HashCache,
    report: SyncReport,
}

impl EngineState {
    fn record(&mut self, path: &RelativePath, hash: ContentHash) {
        if hash.is_empty() {
            self.cache.delete(path);
        } else {
            self.cache.set(path.clone(), hash);
        }
    }
}

/// One side of a sync pair.
pub struct SyncEngine<W: Workspace, T: Transport> {
    role: Role,
    workspace: Arc<W>,
    transport: Arc<T>,
    state: Mutex<EngineState>,
}

impl<W: Workspace, T: Transport> SyncEngine<W, T> {
    /// Create an engine with an empty cache.
    pub fn new(role: Role, workspace: Arc<W>, transport: Arc<T>) -> Self {
        Self {
            role,
            workspace,
            transport,
            state: Mutex::new(EngineState {
                cache: HashCache::new(),
                report: SyncReport::default(),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn workspace(&self) -> &Arc<W> {
        &self.workspace
    }

    /// Copy of the counters so far.
    pub async fn report(&self) -> SyncReport {
        self.state.lock().await.report.clone()
    }

    /// Copy of the hash cache.
    pub async fn cache(&self) -> HashCache {
        self.state.lock().await.cache.clone()
    }

    /// Announce a local filesystem event to the peer.
    ///
    /// The file is read when the event is handled, not when it fired. A
    /// file that vanished in between is announced as deleted.
    ///
    /// A delete for a path with no cache entry may name a directory that was
    /// removed or renamed away. Every cached path inside it is re-read and
    /// announced on its own.
    pub async fn handle_local_change(&self, event: &ChangeEvent) -> Result<Outcome> {
        let path = &event.relative_path;
        let mut state = self.state.lock().await;

        if event.kind == ChangeKind::Delete && !state.cache.contains(path) {
            let inside: Vec<RelativePath> = state
                .cache
                .iter()
                .map(|(cached, _)| cached)
                .filter(|cached| cached.is_within(path))
                .cloned()
                .collect();
            if !inside.is_empty() {
                tracing::debug!(dir = %path, files = inside.len(), "directory removed");
                let mut sent = 0;
                for file in &inside {
                    let content = self.workspace.read(file).await?.unwrap_or_default();
                    if let Outcome::Sent { .. } = self.announce(&mut state, file, content).await? {
                        sent += 1;
                    }
                }
                return Ok(Outcome::DirectoryRemoved {
                    path: path.clone(),
                    sent,
                });
            }
        }

        let content = match event.kind {
            ChangeKind::Delete => Bytes::new(),
            ChangeKind::Add | ChangeKind::Change => {
                self.workspace.read(path).await?.unwrap_or_default()
            }
        };
        self.announce(&mut state, path, content).await
    }

    /// Send `content` as the new state of `path` unless the peer has it.
    async fn announce(
        &self,
        state: &mut EngineState,
        path: &RelativePath,
        content: Bytes,
    ) -> Result<Outcome> {
        let new_hash = ContentHash::of(&content);
        let old_hash = state.cache.get(path);

        if new_hash == old_hash {
            tracing::debug!(%path, hash = %new_hash, "local change already synced");
            state.report.suppressed += 1;
            return Ok(Outcome::Suppressed { path: path.clone() });
        }

        let message = SyncMessage::replace(path.clone(), old_hash, new_hash, content);
        message.validate()?;
        self.transport.send(message.encode()?).await?;

        tracing::debug!(%path, old = %old_hash, new = %new_hash, "sent local change");
        state.record(path, new_hash);
        state.report.sent += 1;
        Ok(Outcome::Sent {
            path: path.clone(),
            new_hash,
        })
    }

    /// Process one message received from the peer.
    pub async fn handle_remote_message(&self, text: &str) -> Result<Outcome> {
        let message = match SyncMessage::decode(text).and_then(|m| m.validate().map(|_| m)) {
            Ok(message) => message,
            Err(e) => {
                self.state.lock().await.report.rejected += 1;
                return Err(SyncError::invalid_message(e, text));
            }
        };
        let change = message.into_change();

        let mut state = self.state.lock().await;
        match self.role {
            Role::Follower => self.apply(&mut state, &change).await,
            Role::Leader => self.arbitrate(&mut state, &change).await,
        }
    }

    async fn apply(&self, state: &mut EngineState, change: &FileChange) -> Result<Outcome> {
        let path = change.relative_path();
        let hash = *change.new_hash();
        self.workspace.apply(path, change.content(), &hash).await?;

        tracing::debug!(%path, %hash, delete = change.is_delete(), "applied remote change");
        state.record(path, hash);
        state.report.applied += 1;
        Ok(Outcome::Applied {
            path: path.clone(),
            hash,
        })
    }

    async fn arbitrate(&self, state: &mut EngineState, change: &FileChange) -> Result<Outcome> {
        let path = change.relative_path();
        let (content, current) = self.workspace.read_hashed(path).await?;

        if current == *change.old_hash() {
            return self.apply(state, change).await;
        }

        if current == *change.new_hash() {
            tracing::debug!(%path, hash = %current, "remote change already present");
            state.record(path, current);
            state.report.already_in_sync += 1;
            return Ok(Outcome::AlreadyInSync { path: path.clone() });
        }

        tracing::info!(
            %path,
            expected = %change.old_hash(),
            actual = %current,
            "conflict, overriding follower"
        );
        let reply = SyncMessage::replace(path.clone(), *change.new_hash(), current, content);
        self.transport.send(reply.encode()?).await?;

        state.record(path, current);
        state.report.overridden += 1;
        Ok(Outcome::Overridden {
            path: path.clone(),
            hash: current,
        })
    }

    /// Drain the inbound queue until it closes or `shutdown` fires.
    ///
    /// Bad messages and failed applies are logged and skipped.
    pub async fn run(
        &self,
        queue: &MessageQueue<String>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            let text = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = queue.next() => match next {
                    Some(text) => text,
                    None => return Ok(()),
                },
            };
            match self.handle_remote_message(&text).await {
                Ok(outcome) => tracing::trace!(?outcome, "remote message handled"),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal error handling remote message");
                    return Err(e);
                }
                Err(e @ SyncError::InvalidMessage { .. }) => {
                    tracing::warn!(error = %e, "dropping malformed message");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping remote change");
                    self.state.lock().await.report.failed += 1;
                }
            }
        }
    }

    /// Forward local events until the channel closes or `shutdown` fires.
    pub async fn run_local(
        &self,
        events: &mut mpsc::UnboundedReceiver<ChangeEvent>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };
            match self.handle_local_change(&event).await {
                Ok(outcome) => tracing::trace!(?outcome, "local event handled"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %event.relative_path, error = %e, "dropping local change");
                    self.state.lock().await.report.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryRelay, MemoryTransport};
    use crate::transport::PairingMode;
    use quasar_filesync_store::MemoryWorkspace;
    use std::path::PathBuf;

    type Engine = SyncEngine<MemoryWorkspace, MemoryTransport>;

    struct Side {
        engine: Engine,
        inbox: Arc<MessageQueue<String>>,
    }

    impl Side {
        fn new(role: Role, transport: MemoryTransport) -> Self {
            let inbox = Arc::new(MessageQueue::unbounded());
            let sink = inbox.clone();
            transport.on_message(Box::new(move |text| {
                let _ = sink.push(text);
            }));
            Self {
                engine: SyncEngine::new(role, Arc::new(MemoryWorkspace::new()), Arc::new(transport)),
                inbox,
            }
        }

        async fn edit(&self, path: &str, content: &[u8]) -> Outcome {
            let path = RelativePath::new(path).unwrap();
            self.engine.workspace().write(&path, content).await.unwrap();
            self.engine
                .handle_local_change(&ChangeEvent::new(ChangeKind::Change, PathBuf::from(path.as_str()), path))
                .await
                .unwrap()
        }

        async fn receive(&self) -> Result<Outcome> {
            let text = self.inbox.try_next().expect("message pending");
            self.engine.handle_remote_message(&text).await
        }

        async fn content(&self, path: &str) -> Option<Bytes> {
            self.engine
                .workspace()
                .read(&RelativePath::new(path).unwrap())
                .await
                .unwrap()
        }
    }

    fn pair() -> (Side, Side) {
        let relay = MemoryRelay::with_seed(3);
        let a = relay.connect(&PairingMode::NewChannel).unwrap();
        let b = relay
            .connect(&PairingMode::ChannelId(a.channel_id()))
            .unwrap();
        (Side::new(Role::Leader, a), Side::new(Role::Follower, b))
    }

    #[tokio::test]
    async fn test_follower_change_accepted_by_leader() {
        let (leader, follower) = pair();

        let sent = follower.edit("a.txt", b"hello").await;
        assert!(matches!(sent, Outcome::Sent { .. }));

        let outcome = leader.receive().await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));
        assert_eq!(leader.content("a.txt").await.unwrap().as_ref(), b"hello");
        assert!(follower.inbox.try_next().is_none());
    }

    #[tokio::test]
    async fn test_repeat_event_is_suppressed() {
        let (_leader, follower) = pair();

        follower.edit("a.txt", b"same").await;
        let again = follower.edit("a.txt", b"same").await;
        assert!(matches!(again, Outcome::Suppressed { .. }));
        assert_eq!(follower.engine.report().await.sent, 1);
        assert_eq!(follower.engine.report().await.suppressed, 1);
    }

    #[tokio::test]
    async fn test_leader_overrides_stale_change() {
        let (leader, follower) = pair();

        // Leader edits while the follower's change is in flight.
        follower.edit("a.txt", b"world").await;
        leader.edit("a.txt", b"hello").await;

        // Follower takes the leader's edit unconditionally.
        assert!(matches!(follower.receive().await.unwrap(), Outcome::Applied { .. }));

        // Leader sees a stale old hash and answers with its own content.
        let outcome = leader.receive().await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Overridden {
                path: RelativePath::new("a.txt").unwrap(),
                hash: ContentHash::of(b"hello"),
            }
        );
        assert!(matches!(follower.receive().await.unwrap(), Outcome::Applied { .. }));

        assert_eq!(leader.content("a.txt").await.unwrap().as_ref(), b"hello");
        assert_eq!(follower.content("a.txt").await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_leader_already_has_content() {
        let (leader, follower) = pair();

        follower.edit("a.txt", b"v1").await;
        leader.receive().await.unwrap();

        // Same bytes written independently on both sides.
        leader.engine.workspace().write(&RelativePath::new("b.txt").unwrap(), b"x").await.unwrap();
        follower.edit("b.txt", b"x").await;
        assert!(matches!(leader.receive().await.unwrap(), Outcome::AlreadyInSync { .. }));
        assert!(follower.inbox.try_next().is_none());
        assert_eq!(leader.engine.cache().await.get(&RelativePath::new("b.txt").unwrap()), ContentHash::of(b"x"));
    }

    #[tokio::test]
    async fn test_delete_propagates() {
        let (leader, follower) = pair();

        follower.edit("gone.txt", b"bye").await;
        leader.receive().await.unwrap();

        let path = RelativePath::new("gone.txt").unwrap();
        follower.engine.workspace().remove(&path).await.unwrap();
        let outcome = follower
            .engine
            .handle_local_change(&ChangeEvent::new(ChangeKind::Delete, PathBuf::from("gone.txt"), path.clone()))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Sent { new_hash, .. } if new_hash.is_empty()));

        leader.receive().await.unwrap();
        assert!(leader.content("gone.txt").await.is_none());
        assert!(!leader.engine.cache().await.contains(&path));
    }

    #[tokio::test]
    async fn test_override_reply_on_the_wire() {
        let (leader, follower) = pair();
        let path = RelativePath::new("a.txt").unwrap();
        leader.engine.workspace().write(&path, b"hello").await.unwrap();

        follower.edit("a.txt", b"world").await;
        assert!(matches!(leader.receive().await.unwrap(), Outcome::Overridden { .. }));

        let reply = SyncMessage::decode(&follower.inbox.try_next().unwrap())
            .unwrap()
            .into_change();
        assert_eq!(reply.relative_path(), &path);
        assert_eq!(*reply.old_hash(), ContentHash::of(b"world"));
        assert_eq!(*reply.new_hash(), ContentHash::of(b"hello"));
        assert_eq!(reply.content().as_ref(), b"hello");
        assert!(follower.inbox.try_next().is_none());
    }

    #[tokio::test]
    async fn test_removed_directory_deletes_synced_files() {
        let (leader, follower) = pair();
        for (file, content) in [("docs/a.md", b"a"), ("docs/deep/b.md", b"b"), ("docsx.md", b"x")] {
            follower.edit(file, content).await;
            leader.receive().await.unwrap();
        }

        // `mv docs elsewhere`: the files are gone and only the directory is reported.
        for file in ["docs/a.md", "docs/deep/b.md"] {
            follower
                .engine
                .workspace()
                .remove(&RelativePath::new(file).unwrap())
                .await
                .unwrap();
        }
        let dir = RelativePath::new("docs").unwrap();
        let outcome = follower
            .engine
            .handle_local_change(&ChangeEvent::new(ChangeKind::Delete, PathBuf::from("docs"), dir.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::DirectoryRemoved { path: dir, sent: 2 });

        leader.receive().await.unwrap();
        leader.receive().await.unwrap();
        assert!(leader.content("docs/a.md").await.is_none());
        assert!(leader.content("docs/deep/b.md").await.is_none());
        assert_eq!(leader.content("docsx.md").await.unwrap().as_ref(), b"x");
        assert_eq!(follower.engine.cache().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_path_suppressed() {
        let (_leader, follower) = pair();
        follower.edit("kept.txt", b"k").await;

        let path = RelativePath::new("never").unwrap();
        let outcome = follower
            .engine
            .handle_local_change(&ChangeEvent::new(ChangeKind::Delete, PathBuf::from("never"), path.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Suppressed { path });
    }

    #[tokio::test]
    async fn test_vanished_file_announced_as_delete() {
        let (leader, follower) = pair();
        follower.edit("tmp.txt", b"1").await;
        leader.receive().await.unwrap();

        let path = RelativePath::new("tmp.txt").unwrap();
        follower.engine.workspace().remove(&path).await.unwrap();
        let outcome = follower
            .engine
            .handle_local_change(&ChangeEvent::new(ChangeKind::Change, PathBuf::from("tmp.txt"), path))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Sent { new_hash, .. } if new_hash == ContentHash::empty()));
    }

    #[tokio::test]
    async fn test_malformed_messages_rejected() {
        let (leader, _follower) = pair();

        let err = leader.engine.handle_remote_message("{not json").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage { .. }));

        let lying = SyncMessage::replace(
            RelativePath::new("a.txt").unwrap(),
            ContentHash::empty(),
            ContentHash::of(b"claimed"),
            Bytes::from_static(b"actual"),
        )
        .encode()
        .unwrap();
        let err = leader.engine.handle_remote_message(&lying).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(leader.content("a.txt").await.is_none());
        assert_eq!(leader.engine.report().await.rejected, 2);
        assert!(leader.engine.cache().await.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_path_rejected() {
        let (_leader, follower) = pair();
        let hook = SyncMessage::replace(
            RelativePath::new(".git/hooks/pre-commit").unwrap(),
            ContentHash::empty(),
            ContentHash::of(b"#!/bin/sh"),
            Bytes::from_static(b"#!/bin/sh"),
        )
        .encode()
        .unwrap();

        let err = follower.engine.handle_remote_message(&hook).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage { .. }));
        assert!(follower.content(".git/hooks/pre-commit").await.is_none());
        assert_eq!(follower.engine.report().await.rejected, 1);
    }

    #[tokio::test]
    async fn test_run_applies_then_stops_on_close() {
        let (leader, follower) = pair();
        let leader = Arc::new(leader);

        follower.edit("one.txt", b"1").await;
        leader.inbox.push("garbage".into()).unwrap();
        follower.edit("two.txt", b"2").await;

        let shutdown = CancellationToken::new();
        let runner = {
            let leader = leader.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { leader.engine.run(&leader.inbox, &shutdown).await })
        };

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while leader.content("two.txt").await.is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        leader.inbox.close();
        runner.await.unwrap().unwrap();

        let report = leader.engine.report().await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.rejected, 1);
    }
}
