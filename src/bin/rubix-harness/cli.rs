//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use rubix_harness::{HarnessConfig, HarnessOptions, LaunchMode, ScenarioSelection};
use std::path::PathBuf;

/// End-to-end tests for Rubix nodes.
#[derive(Parser, Debug)]
#[command(name = "rubix-harness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip prerequisite steps such as building the Rubix binary.
    #[arg(long = "skip_prerequisite")]
    pub skip_prerequisite: bool,

    /// Only run the Rubix nodes and skip the setup.
    #[arg(long = "run_nodes_only")]
    pub run_nodes_only: bool,

    /// Skip adding quorums to the quorum nodes.
    #[arg(long = "skip_adding_quorums")]
    pub skip_adding_quorums: bool,

    /// Only proceed with running tests against already provisioned nodes.
    #[arg(long = "run_tests_only")]
    pub run_tests_only: bool,

    /// Built-in scenario to run (repeatable).
    #[arg(long = "scenario", default_value = "rbt_transfer")]
    pub scenarios: Vec<String>,

    /// Additional scenario plan in JSON (repeatable).
    #[arg(long = "plan")]
    pub plans: Vec<PathBuf>,

    /// Repository root containing the Makefile and build folders.
    #[arg(long, env = "RUBIX_REPO_ROOT")]
    pub repo_root: Option<PathBuf>,

    /// Node registry file.
    #[arg(long, env = "RUBIX_NODE_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Directory for topology snapshots.
    #[arg(long, env = "RUBIX_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// How node processes are detached.
    #[arg(long, value_enum)]
    pub launch_mode: Option<CliLaunchMode>,

    /// Settle delay after each node launch, in seconds.
    #[arg(long)]
    pub settle_delay_secs: Option<u64>,

    /// Log level.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to this TOML file before running.
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

/// Launch mode CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliLaunchMode {
    /// Detached `screen` session.
    Screen,
    /// Background job with output in `<node>.out`.
    Background,
}

impl From<CliLaunchMode> for LaunchMode {
    fn from(mode: CliLaunchMode) -> Self {
        match mode {
            CliLaunchMode::Screen => Self::Screen,
            CliLaunchMode::Background => Self::Background,
        }
    }
}

impl Cli {
    /// Pipeline switches.
    #[must_use]
    pub fn options(&self) -> HarnessOptions {
        HarnessOptions {
            skip_prerequisite: self.skip_prerequisite,
            run_nodes_only: self.run_nodes_only,
            skip_adding_quorums: self.skip_adding_quorums,
            run_tests_only: self.run_tests_only,
        }
    }

    /// Scenarios to run.
    #[must_use]
    pub fn selection(&self) -> ScenarioSelection {
        ScenarioSelection {
            names: self.scenarios.clone(),
            plan_files: self.plans.clone(),
        }
    }

    /// Build the harness configuration from the config file and overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<HarnessConfig> {
        let mut config = if let Some(ref path) = self.config {
            HarnessConfig::from_file(path)?
        } else {
            HarnessConfig::default()
        };

        if let Some(ref root) = self.repo_root {
            config.repo_root.clone_from(root);
        }
        if let Some(ref registry) = self.registry {
            config.registry_path.clone_from(registry);
        }
        if let Some(ref dir) = self.state_dir {
            config.state_dir.clone_from(dir);
        }
        if let Some(mode) = self.launch_mode {
            config.launch_mode = mode.into();
        }
        if let Some(secs) = self.settle_delay_secs {
            config.readiness.settle_delay_secs = secs;
        }
        config.log_level.clone_from(&self.log_level);

        Ok(config)
    }

    /// Write `config` to the `--save-config` path, if one was given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self, config: &HarnessConfig) -> color_eyre::Result<()> {
        if let Some(ref path) = self.save_config {
            config.to_file(path)?;
        }
        Ok(())
    }
}
