//! Scenario runner.
//!
//! A scenario moves through `NotSetup → Setup → Running → Completed | Failed`.
//! [`ScenarioRunner::setup`] either provisions the plan's topology or
//! resumes from the persisted snapshot; [`ScenarioRunner::run`] then executes
//! the plan's cases step by step, classifying each outcome with
//! [`expect_success`] or [`expect_failure`].

pub mod catalog;
pub mod plan;

pub use plan::{
    Action, Expectation, IdentitySpec, Introduction, QuorumBinding, ScenarioCase, ScenarioPlan,
    Step, TopologyPlan,
};

use crate::error::{Error, Result};
use crate::provision::Provisioner;
use crate::quorum::QuorumGroup;
use crate::registry::NodeRegistry;
use crate::topology::TopologySnapshot;
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Lifecycle state of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScenarioState {
    /// Nothing provisioned or loaded yet.
    #[default]
    NotSetup,
    /// Topology is ready.
    Setup,
    /// Steps are executing.
    Running,
    /// Every step met its expectation.
    Completed,
    /// A step violated its expectation or a setup step failed.
    Failed(String),
}

/// How [`ScenarioRunner::setup`] obtains its topology.
#[derive(Debug, Clone, Copy)]
pub enum SetupMode<'r> {
    /// Provision nodes and identities listed in the registry.
    Provision(&'r NodeRegistry),
    /// Load the persisted snapshot of nodes that are still running.
    Resume,
}

/// Require `action` to succeed.
///
/// # Errors
///
/// Returns `Error::UnexpectedFailure` wrapping the underlying failure.
pub async fn expect_success<T, F>(action: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    fut.await.map_err(|e| Error::UnexpectedFailure {
        action: action.to_string(),
        source: Box::new(e),
    })
}

/// Require `action` to fail.
///
/// # Errors
///
/// Returns `Error::UnexpectedSuccess` if the action succeeds.
pub async fn expect_failure<T, F>(action: &str, fut: F) -> Result<()>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(_) => Err(Error::UnexpectedSuccess {
            action: action.to_string(),
        }),
        Err(e) if e.is_command_failure() => {
            info!(action, "Failed as expected: {e}");
            Ok(())
        }
        Err(e) => {
            warn!(action, "Failed as expected, but not in the node binary: {e}");
            Ok(())
        }
    }
}

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    /// Case name.
    pub name: String,
    /// Number of steps executed.
    pub steps: usize,
}

/// Outcome of a completed scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: String,
    /// Cases in execution order.
    pub cases: Vec<CaseReport>,
}

/// Runs one [`ScenarioPlan`].
#[derive(Debug)]
pub struct ScenarioRunner<'p> {
    provisioner: &'p Provisioner,
    plan: ScenarioPlan,
    state: ScenarioState,
    snapshot: TopologySnapshot,
}

impl<'p> ScenarioRunner<'p> {
    /// Create a runner for `plan`.
    #[must_use]
    pub fn new(provisioner: &'p Provisioner, plan: ScenarioPlan) -> Self {
        Self {
            provisioner,
            plan,
            state: ScenarioState::NotSetup,
            snapshot: TopologySnapshot::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    /// Current topology.
    #[must_use]
    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    /// The plan being run.
    #[must_use]
    pub fn plan(&self) -> &ScenarioPlan {
        &self.plan
    }

    /// Path of this scenario's topology snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.provisioner
            .config()
            .state_path(&self.plan.snapshot_file)
    }

    /// Provision or resume the scenario's topology.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if called twice, `Error::Config` when
    /// resuming without a persisted snapshot, and the first provisioning
    /// failure otherwise.
    pub async fn setup(&mut self, mode: SetupMode<'_>) -> Result<()> {
        if self.state != ScenarioState::NotSetup {
            return Err(Error::OutOfOrder(format!(
                "scenario {} is already {:?}",
                self.plan.name, self.state
            )));
        }

        let result = match mode {
            SetupMode::Resume => self.resume(),
            SetupMode::Provision(registry) => self.provision(registry).await,
        };
        match result {
            Ok(()) => {
                self.state = ScenarioState::Setup;
                Ok(())
            }
            Err(e) => {
                self.state = ScenarioState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn resume(&mut self) -> Result<()> {
        let path = self.snapshot_path();
        self.snapshot = TopologySnapshot::load(&path)?;
        if self.snapshot.is_empty() {
            return Err(Error::Config(format!(
                "no topology to resume for scenario {} at {}",
                self.plan.name,
                path.display()
            )));
        }
        info!(scenario = %self.plan.name, nodes = ?self.snapshot.names(), "Resumed topology");
        Ok(())
    }

    async fn provision(&mut self, registry: &NodeRegistry) -> Result<()> {
        let provisioner = self.provisioner;
        let topology = self.plan.topology.clone();
        info!(scenario = %self.plan.name, "Setting up scenario");

        for group in topology.quorum_groups.iter().filter(|g| !g.is_hosted()) {
            provisioner
                .provision_quorum_group(registry, group, false, false)
                .await?;
        }

        provisioner
            .provision_nodes(registry, &topology.registry_key, topology.family, &mut self.snapshot)
            .await?;

        for group in topology.quorum_groups.iter().filter(|g| g.is_hosted()) {
            provisioner
                .provision_hosted_group(&mut self.snapshot, group)
                .await?;
        }

        for spec in &topology.identities {
            provisioner
                .create_identity(&mut self.snapshot, &spec.node, &spec.alias, spec.kind)
                .await?;
            if spec.register {
                provisioner
                    .register_identity(&mut self.snapshot, &spec.node, &spec.alias)
                    .await?;
            }
        }
        self.snapshot.save(&self.snapshot_path())?;

        for binding in &topology.bindings {
            let group = self.group(&binding.group)?;
            let members = if group.is_hosted() {
                self.snapshot.clone()
            } else {
                TopologySnapshot::load(&provisioner.config().state_path(&group.snapshot_file))?
            };
            if members.is_empty() {
                return Err(Error::OutOfOrder(format!(
                    "quorum group {} must be provisioned before binding {}",
                    group.name, binding.node
                )));
            }
            info!(node = %binding.node, group = %group.name, "Adding quorums");
            provisioner
                .bind_to_group(&mut self.snapshot, &binding.node, &group, &members)
                .await?;
        }

        for intro in &topology.introductions {
            provisioner
                .introduce(&mut self.snapshot, &intro.subject, &intro.to_node)
                .await?;
        }

        self.snapshot.save(&self.snapshot_path())?;
        info!(scenario = %self.plan.name, "Setup done");
        Ok(())
    }

    fn group(&self, name: &str) -> Result<QuorumGroup> {
        if let Some(group) = self
            .plan
            .topology
            .quorum_groups
            .iter()
            .find(|g| g.name == name)
        {
            return Ok(group.clone());
        }
        let primary = QuorumGroup::primary(&self.provisioner.config().quorum);
        if primary.name == name {
            Ok(primary)
        } else {
            Err(Error::Config(format!(
                "scenario {} binds to unknown quorum group {name}",
                self.plan.name
            )))
        }
    }

    /// Execute every case in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` unless the scenario is set up, and the
    /// first step whose outcome differs from its expectation.
    pub async fn run(&mut self) -> Result<ScenarioReport> {
        if self.state != ScenarioState::Setup {
            return Err(Error::OutOfOrder(format!(
                "scenario {} must be set up before running, it is {:?}",
                self.plan.name, self.state
            )));
        }
        self.state = ScenarioState::Running;
        info!(scenario = %self.plan.name, "Running scenario");

        let cases = self.plan.cases.clone();
        let mut report = ScenarioReport {
            scenario: self.plan.name.clone(),
            cases: Vec::with_capacity(cases.len()),
        };

        for case in &cases {
            info!(case = %case.name, "Test case started");
            for (n, step) in case.steps.iter().enumerate() {
                info!(case = %case.name, step = n + 1, "{}", step.description);
                if let Err(e) = self.run_step(step).await {
                    self.state = ScenarioState::Failed(e.to_string());
                    // Keep the partial progress for a resumed run.
                    if let Err(save_err) = self.snapshot.save(&self.snapshot_path()) {
                        warn!("Failed to persist topology after failure: {save_err}");
                    }
                    return Err(e);
                }
            }
            info!(case = %case.name, "Test case completed");
            report.cases.push(CaseReport {
                name: case.name.clone(),
                steps: case.steps.len(),
            });
        }

        self.snapshot.save(&self.snapshot_path())?;
        self.state = ScenarioState::Completed;
        info!(scenario = %self.plan.name, "Tests completed");
        Ok(report)
    }

    async fn run_step(&mut self, step: &Step) -> Result<()> {
        match step.expect {
            Expectation::Success => {
                let output = expect_success(&step.description, self.perform(&step.action)).await?;
                if !output.is_empty() {
                    debug!(output = %output, "Step output");
                }
                Ok(())
            }
            Expectation::Failure => {
                expect_failure(&step.description, self.perform(&step.action)).await
            }
        }
    }

    async fn perform(&mut self, action: &Action) -> Result<String> {
        let provisioner = self.provisioner;
        match action {
            Action::Fund { target, tokens } => {
                provisioner
                    .fund_identity(&mut self.snapshot, &target.node, &target.alias, *tokens)
                    .await?;
                Ok(String::new())
            }
            Action::Transfer { from, to, amount } => {
                provisioner
                    .transfer(&self.snapshot, from, to, amount)
                    .await
            }
            Action::IntroducePeer { subject, to_node } => {
                provisioner
                    .introduce(&mut self.snapshot, subject, to_node)
                    .await?;
                Ok(String::new())
            }
            Action::AccountInfo { target } => {
                let info = provisioner.account_info(&self.snapshot, target).await?;
                info!(identity = %target, "Account info: {info}");
                Ok(info)
            }
        }
    }
}
