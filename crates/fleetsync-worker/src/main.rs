use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleetsync_bus::SourceClient;
use fleetsync_worker::config::DEFAULT_CONFIG_PATH;
use fleetsync_worker::{logging, open_store, shutdown, MemoryQueueProvider, WorkerConfig, WorkerServer};

/// Fleet synchronization worker.
#[derive(Debug, Parser)]
#[command(name = "fleetsync-worker", version, about)]
struct Cli {
    /// Configuration file; created with defaults if missing.
    #[arg(short, long, env = "FLEETSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = WorkerConfig::load_or_generate(&cli.config);
    let level = config
        .as_ref()
        .map(|c| c.service.log_level.as_str())
        .unwrap_or("info");
    logging::init(level);

    info!("starting worker service");
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "reading configuration");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "worker failed");
            ExitCode::FAILURE
        }
    };
    info!("worker service stopped");
    code
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    info!(config = ?config, "using config");

    info!("initializing data store");
    let store = open_store(&config.store).context("initializing data store")?;
    let provider = Arc::new(MemoryQueueProvider::new(config.queue.capacity));
    let source = SourceClient::connect(&config.bus)
        .await
        .context("creating event source client")?;

    let cancel = CancellationToken::new();
    let _signals = shutdown::spawn_signal_handler(cancel.clone()).context("installing signal handlers")?;

    WorkerServer::new(config, store, provider, source)?
        .run(cancel)
        .await?;
    Ok(())
}
