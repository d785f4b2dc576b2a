//! rubix-shutdown CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use rubix_harness::Provisioner;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.to_config()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let paths = cli.snapshot_paths(&config);
    let provisioner = Provisioner::new(config)?;
    let stopped = provisioner.shutdown_snapshots(&paths).await;

    info!(stopped, "Shutdown requested for all recorded nodes");
    Ok(())
}
