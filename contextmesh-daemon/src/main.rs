//! contextmesh daemon
//!
//! Runs the context store together with fusion, prioritization and device
//! sync until interrupted, then writes a final snapshot.
//!
//! Usage:
//!   contextmesh --config contextmesh.toml --snapshot state/contexts.json

use anyhow::{Context, Result};
use clap::Parser;
use contextmesh_daemon::{ContextMesh, MeshConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "contextmesh")]
#[command(about = "Unified context store with fusion, prioritization and device sync")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot file; enables persistence
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase())),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => MeshConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MeshConfig::default(),
    };
    if let Some(snapshot) = args.snapshot {
        config = config.with_snapshot(snapshot);
    }

    info!("contextmesh starting...");
    let mesh = ContextMesh::start(config)
        .await
        .context("starting subsystems")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down...");
    mesh.shutdown().await.context("shutting down")?;
    Ok(())
}
