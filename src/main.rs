//! Main entry point for the beamline worker.
//!
//! Starts the worker with configuration from command-line flags and runs
//! until interrupted. The bus transport client is an external
//! collaborator; until one is attached, outbound acknowledgements and
//! results go through the stdout stub adapter.

use std::sync::Arc;

use clap::Parser;

use beamline_worker::config::Cli;
use beamline_worker::{StdoutBus, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: WorkerConfig = cli.into();

    let bus = Arc::new(StdoutBus::new());
    let worker = Worker::start(config, bus).await?;

    tokio::signal::ctrl_c().await?;
    worker.shutdown().await;

    Ok(())
}
