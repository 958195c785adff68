//! CLI arguments for agora

use clap::Parser;
use std::path::PathBuf;

/// agora - run a timed autonomous multi-agent economy
#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "In-process kernel for emergent multi-agent economies")]
#[command(version)]
pub struct Cli {
    /// Length of the autonomous run in seconds; runs until ctrl-c when absent
    #[arg(long)]
    pub duration: Option<u64>,

    /// YAML file of principal definitions to load at startup
    #[arg(long)]
    pub agents: Option<PathBuf>,

    /// Kernel configuration file (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Snapshot file: restored before the run when present, saved after
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}
