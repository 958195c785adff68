//! `agora` - an in-process kernel for emergent multi-agent economies
//!
//! This binary boots a kernel, seeds principals from a YAML definition
//! file, lets their autonomous loops run for a bounded time (or until
//! ctrl-c) and shuts everything down in order. Exit code 0 means a clean
//! shutdown; any fatal kernel error exits non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use agora_core::{JsonFileSink, Kernel, KernelConfig, Scheduler, SnapshotSink};

use crate::cli::Cli;

mod agents;
mod cli;

/// Drain budget granted to each worker at shutdown
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => KernelConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => KernelConfig::default(),
    };

    let kernel = Kernel::new(config).context("kernel bootstrap failed")?;

    // Restore a previous checkpoint when one exists at the snapshot path.
    if let Some(path) = &cli.snapshot {
        if path.exists() {
            let sink = JsonFileSink::new(path);
            let snapshot = sink
                .load()
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
            kernel
                .restore(snapshot)
                .context("failed to restore snapshot")?;
            tracing::info!(path = %path.display(), "snapshot restored");
        }
    }

    let scheduler = Scheduler::new(kernel.clone());

    if let Some(path) = &cli.agents {
        let file = agents::load(path)?;
        let started = agents::install(&kernel, &scheduler, file).await?;
        tracing::info!(count = started.len(), "principals installed");
    }

    // Timed run, cut short by ctrl-c either way.
    match cli.duration {
        Some(seconds) => {
            tracing::info!(seconds, "autonomous run started");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down early");
                }
            }
        }
        None => {
            tracing::info!("running until ctrl-c");
            tokio::signal::ctrl_c().await.context("signal wait failed")?;
        }
    }

    scheduler.stop_all(STOP_TIMEOUT).await;

    if let Some(path) = &cli.snapshot {
        JsonFileSink::new(path)
            .save(&kernel.snapshot())
            .with_context(|| format!("failed to save snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "snapshot saved");
    }

    println!(
        "clean shutdown: {} artifacts, {} events",
        kernel.store().len(),
        kernel.events().len()
    );
    Ok(())
}
