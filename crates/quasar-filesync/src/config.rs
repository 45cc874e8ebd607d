//! Configuration and command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use quasar_filesync_core::Role;
use quasar_filesync_sync::{PairingMode, RelayConfig, SessionConfig};

use crate::error::{FileSyncError, Result};

/// Everything needed to run one sync session against a directory.
#[derive(Debug, Clone)]
pub struct FileSyncConfig {
    /// Relay endpoint, with or without a `ws://`/`wss://` scheme.
    pub url: String,
    /// Directory to sync.
    pub directory: PathBuf,
    /// Verbose logging.
    pub debug: bool,
    pub session: SessionConfig,
    pub relay: RelayConfig,
}

impl Default for FileSyncConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            directory: PathBuf::from("."),
            debug: false,
            session: SessionConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Sync a directory with one peer through a Quasar relay.
#[derive(Parser, Debug, Clone)]
#[command(name = "quasar-filesync")]
#[command(version)]
pub struct Args {
    /// Relay endpoint
    #[arg(long)]
    pub url: String,

    /// Pairing code from the other party
    #[arg(long, conflicts_with = "channel")]
    pub code: Option<String>,

    /// Channel id to join
    #[arg(long)]
    pub channel: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Role in the pair: leader or follower
    #[arg(long = "user-type")]
    pub user_type: String,

    /// Directory to sync
    #[arg(long, default_value = ".")]
    pub directory: PathBuf,

    /// Maximum buffered inbound messages (unbounded when omitted)
    #[arg(long)]
    pub queue_capacity: Option<usize>,
}

impl Args {
    /// Validate the arguments and build a [`FileSyncConfig`].
    pub fn into_config(self) -> Result<FileSyncConfig> {
        let role: Role = self.user_type.parse()?;

        let pairing = match (self.code, self.channel) {
            (Some(_), Some(_)) => {
                return Err(FileSyncError::Config(
                    "--code and --channel are mutually exclusive".into(),
                ))
            }
            (Some(code), None) => PairingMode::Code(code),
            (None, Some(channel)) => PairingMode::ChannelId(channel),
            (None, None) => PairingMode::NewChannel,
        };

        if self.queue_capacity == Some(0) {
            return Err(FileSyncError::Config(
                "--queue-capacity must be at least 1".into(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(FileSyncError::Config("--url must not be empty".into()));
        }

        Ok(FileSyncConfig {
            url: self.url,
            directory: self.directory,
            debug: self.debug,
            session: SessionConfig {
                role,
                pairing,
                queue_capacity: self.queue_capacity,
            },
            relay: RelayConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("quasar-filesync").chain(args.iter().copied()))
    }

    #[test]
    fn test_minimal_args() {
        let config = parse(&["--url", "relay.example.com", "--user-type", "leader"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.session.role, Role::Leader);
        assert_eq!(config.session.pairing, PairingMode::NewChannel);
        assert_eq!(config.directory, PathBuf::from("."));
        assert_eq!(config.session.queue_capacity, None);
        assert!(!config.debug);
    }

    #[test]
    fn test_code_and_capacity() {
        let config = parse(&[
            "--url",
            "ws://localhost:8080",
            "--user-type",
            "follower",
            "--code",
            "4-amber-river",
            "--directory",
            "/tmp/shared",
            "--queue-capacity",
            "16",
            "--debug",
        ])
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(config.session.role, Role::Follower);
        assert_eq!(
            config.session.pairing,
            PairingMode::Code("4-amber-river".into())
        );
        assert_eq!(config.session.queue_capacity, Some(16));
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_role_rejected() {
        let err = parse(&["--url", "r", "--user-type", "boss"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(matches!(err, FileSyncError::Core(_)));
    }

    #[test]
    fn test_missing_required_flags() {
        assert!(parse(&["--user-type", "leader"]).is_err());
        assert!(parse(&["--url", "r"]).is_err());
    }

    #[test]
    fn test_code_conflicts_with_channel() {
        assert!(parse(&[
            "--url", "r", "--user-type", "leader", "--code", "1-a-b", "--channel", "c"
        ])
        .is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = parse(&["--url", "r", "--user-type", "leader", "--queue-capacity", "0"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert!(matches!(err, FileSyncError::Config(_)));
    }
}
