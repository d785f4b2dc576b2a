//! CLI definition for rubix-shutdown.

use clap::Parser;
use rubix_harness::scenario::catalog;
use rubix_harness::HarnessConfig;
use std::path::PathBuf;

/// Shut down every Rubix node recorded in topology snapshots.
#[derive(Parser, Debug)]
#[command(name = "rubix-shutdown")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Snapshot to shut down (repeatable). Defaults to the quorum snapshot
    /// and the snapshot of every built-in scenario.
    #[arg(long = "snapshot")]
    pub snapshots: Vec<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Load the harness configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<HarnessConfig> {
        let mut config = match self.config {
            Some(ref path) => HarnessConfig::from_file(path)?,
            None => HarnessConfig::default(),
        };
        config.log_level.clone_from(&self.log_level);
        Ok(config)
    }

    /// Snapshot files to process.
    #[must_use]
    pub fn snapshot_paths(&self, config: &HarnessConfig) -> Vec<PathBuf> {
        if !self.snapshots.is_empty() {
            return self.snapshots.clone();
        }
        let mut paths = vec![config.state_path(&config.quorum.snapshot_file)];
        for plan in catalog::all() {
            for group in plan.topology.quorum_groups.iter().filter(|g| !g.is_hosted()) {
                paths.push(config.state_path(&group.snapshot_file));
            }
            paths.push(config.state_path(&plan.snapshot_file));
        }
        paths
    }
}
