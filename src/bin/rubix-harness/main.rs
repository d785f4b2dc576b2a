//! rubix-harness CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use rubix_harness::Harness;
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

    info!("rubix-harness v{}", env!("CARGO_PKG_VERSION"));
    cli.save_config(&config)?;

    let plans = cli.selection().resolve()?;
    let harness = Harness::new(config)?;
    let reports = harness.run(plans, cli.options()).await?;

    for report in &reports {
        let steps: usize = report.cases.iter().map(|c| c.steps).sum();
        info!(
            scenario = %report.scenario,
            cases = report.cases.len(),
            steps,
            "Scenario passed"
        );
    }
    Ok(())
}
