//! Quasar file sync client.
//!
//! # Usage
//!
//! ```bash
//! # First machine: opens a channel and prints a pairing code
//! quasar-filesync --url relay.example.com --user-type leader --directory ./shared
//!
//! # Second machine: joins with the code
//! quasar-filesync --url relay.example.com --user-type follower --code 42-amber-river
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Overrides the log filter (default `info`, `debug` with `--debug`)

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quasar_filesync::{Args, FileSync};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid arguments")?;
    let sync = FileSync::open(config)
        .await
        .context("cannot open sync directory")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        }
    });

    let mut code = sync.pairing_code();
    tokio::spawn(async move {
        if let Ok(code) = code.wait_for(Option::is_some).await {
            if let Some(code) = code.as_deref() {
                println!("Pairing code: {code}");
            }
        }
    });

    let outcome = sync.run(shutdown).await.context("sync session failed")?;
    tracing::info!(
        reason = ?outcome.reason,
        sent = outcome.report.sent,
        applied = outcome.report.applied,
        overridden = outcome.report.overridden,
        "sync finished"
    );
    Ok(())
}
