//! Replicator service binary.
//!
//! Loads the configuration file given on the command line, connects to MongoDB and
//! Elasticsearch and runs every configured task until the process is told to stop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use etl_config::shared::ReplicatorConfig;
use etl_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod config;
mod core;
mod error;

/// Replicates MongoDB collections into Elasticsearch indices.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the configuration file (json, yaml or toml).
    config: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> ReplicatorResult<()> {
    let args = Args::parse();

    let replicator_config = load_replicator_config(&args.config)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replicator_config))
}

async fn async_main(replicator_config: ReplicatorConfig) -> ReplicatorResult<()> {
    if let Err(err) = start_replicator_with_config(replicator_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
