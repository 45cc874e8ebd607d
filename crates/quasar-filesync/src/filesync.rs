//! FileSync: one directory, one relay, one peer.
//!
//! Wires the disk workspace, the directory watcher and the relay transport
//! into a [`Session`].

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use quasar_filesync_store::DiskWorkspace;
use quasar_filesync_sync::{
    DirectoryWatcher, RelayTransport, Session, SessionOutcome, SessionState,
};

use crate::config::FileSyncConfig;
use crate::error::Result;

/// A configured sync client for one directory.
pub struct FileSync {
    config: FileSyncConfig,
    workspace: Arc<DiskWorkspace>,
    session: Session<DiskWorkspace>,
}

impl FileSync {
    /// Open (creating if needed) the configured directory.
    pub async fn open(config: FileSyncConfig) -> Result<Self> {
        let workspace = Arc::new(DiskWorkspace::open(&config.directory).await?);
        tracing::info!(
            directory = %workspace.root().display(),
            role = %config.session.role,
            "opened sync directory"
        );
        let session = Session::new(config.session.clone(), workspace.clone());
        Ok(Self {
            config,
            workspace,
            session,
        })
    }

    pub fn config(&self) -> &FileSyncConfig {
        &self.config
    }

    /// Canonical root of the synced directory.
    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    /// Subscribe to session lifecycle changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.session.state()
    }

    /// Subscribe to the pairing code.
    pub fn pairing_code(&self) -> watch::Receiver<Option<String>> {
        self.session.pairing_code()
    }

    /// Connect, pair, and sync until the peer leaves or `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<SessionOutcome> {
        let connect = RelayTransport::connect(
            &self.config.url,
            &self.config.session.pairing,
            self.config.relay.clone(),
        );
        let watcher = DirectoryWatcher::new(self.workspace.root());
        Ok(self.session.run(connect, watcher, shutdown).await?)
    }
}
