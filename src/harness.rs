//! Top-level orchestration behind the `rubix-harness` binary.
//!
//! A full run builds the node binary, starts and configures the primary
//! quorum group, then sets up and runs each selected scenario in order.
//! The option flags cut this pipeline short at well-defined points.

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::gateway::{CommandGateway, OutputSource};
use crate::provision::Provisioner;
use crate::quorum::QuorumGroup;
use crate::registry::NodeRegistry;
use crate::scenario::{catalog, ScenarioPlan, ScenarioReport, ScenarioRunner, SetupMode};
use crate::topology::TopologySnapshot;
use std::path::PathBuf;
use tracing::info;

/// Pipeline switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarnessOptions {
    /// Do not build the node binary.
    pub skip_prerequisite: bool,
    /// Only start nodes; create no identities and run no scenarios.
    pub run_nodes_only: bool,
    /// Write quorum lists but do not load them into quorum nodes.
    pub skip_adding_quorums: bool,
    /// Skip building and provisioning; resume scenarios from their snapshots.
    pub run_tests_only: bool,
}

/// Scenario selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioSelection {
    /// Built-in scenario names.
    pub names: Vec<String>,
    /// Plan files to load in addition to the named scenarios.
    pub plan_files: Vec<PathBuf>,
}

impl ScenarioSelection {
    /// Resolve names and plan files into plans, names first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown scenario name and plan
    /// loading errors for plan files.
    pub fn resolve(&self) -> Result<Vec<ScenarioPlan>> {
        let mut plans = self
            .names
            .iter()
            .map(|name| {
                catalog::by_name(name).ok_or_else(|| {
                    Error::Config(format!(
                        "unknown scenario {name:?}, expected one of {:?}",
                        catalog::SCENARIO_NAMES
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for path in &self.plan_files {
            plans.push(ScenarioPlan::from_file(path)?);
        }
        Ok(plans)
    }
}

/// The end-to-end test pipeline.
#[derive(Debug)]
pub struct Harness {
    provisioner: Provisioner,
}

impl Harness {
    /// Create a harness.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::new`].
    pub fn new(config: HarnessConfig) -> Result<Self> {
        Ok(Self {
            provisioner: Provisioner::new(config)?,
        })
    }

    /// The provisioner driving the node binary.
    #[must_use]
    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    fn config(&self) -> &HarnessConfig {
        self.provisioner.config()
    }

    /// Build the node binary with the platform's make target in `repo_root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the build fails.
    pub async fn build_binary(&self) -> Result<()> {
        let platform = self.config().resolved_platform()?;
        info!(?platform, "Building node binary");
        let gateway = CommandGateway::new(self.config().repo_root.clone(), platform);
        gateway
            .run(platform.build_command(), OutputSource::Stdout)
            .await?;
        info!("Build successful");
        Ok(())
    }

    /// Start the primary quorum group and configure its quorum identities.
    ///
    /// # Errors
    ///
    /// Fails on the first provisioning step that fails.
    pub async fn run_quorum_phase(
        &self,
        registry: &NodeRegistry,
        options: HarnessOptions,
    ) -> Result<TopologySnapshot> {
        let group = QuorumGroup::primary(&self.config().quorum);
        self.provisioner
            .provision_quorum_group(
                registry,
                &group,
                options.run_nodes_only,
                options.skip_adding_quorums,
            )
            .await
    }

    /// Start the nodes of `plan` without creating identities.
    ///
    /// # Errors
    ///
    /// Fails if a node cannot be started or the snapshot cannot be saved.
    pub async fn run_plan_nodes(&self, registry: &NodeRegistry, plan: &ScenarioPlan) -> Result<()> {
        let mut snapshot = TopologySnapshot::new();
        self.provisioner
            .provision_nodes(
                registry,
                &plan.topology.registry_key,
                plan.topology.family,
                &mut snapshot,
            )
            .await?;
        snapshot.save(&self.config().state_path(&plan.snapshot_file))
    }

    /// Run the whole pipeline for `plans`.
    ///
    /// Returns one report per scenario; with `run_nodes_only` no scenario
    /// runs and the list is empty.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later scenarios are not attempted.
    pub async fn run(
        &self,
        plans: Vec<ScenarioPlan>,
        options: HarnessOptions,
    ) -> Result<Vec<ScenarioReport>> {
        let registry = if options.run_tests_only {
            None
        } else {
            if !options.skip_prerequisite {
                self.build_binary().await?;
            }
            let registry = NodeRegistry::load(&self.config().registry_path)?;
            self.run_quorum_phase(&registry, options).await?;
            Some(registry)
        };

        if options.run_nodes_only {
            if let Some(registry) = &registry {
                for plan in &plans {
                    self.run_plan_nodes(registry, plan).await?;
                }
            }
            info!("Nodes are running; skipping scenarios");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(plans.len());
        for (n, plan) in plans.into_iter().enumerate() {
            info!(scenario = %plan.name, "----------- {}. Running {} -----------", n + 1, plan.name);
            let mode = registry.as_ref().map_or(SetupMode::Resume, SetupMode::Provision);
            let mut runner = ScenarioRunner::new(&self.provisioner, plan);
            runner.setup(mode).await?;
            reports.push(runner.run().await?);
        }
        Ok(reports)
    }
}
