//! Scenario plans as data.
//!
//! A [`ScenarioPlan`] describes a topology to provision and an ordered list
//! of cases, each a list of steps with an expected outcome. Plans are
//! serde types so custom scenarios can be loaded from JSON.

use crate::amount::{RbtAmount, MAX_DECIMAL_PLACES};
use crate::error::{Error, Result};
use crate::lifecycle::NodeFamily;
use crate::provision::Endpoint;
use crate::quorum::QuorumGroup;
use crate::topology::{load_json, DidKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// A complete scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioPlan {
    /// Scenario name.
    pub name: String,
    /// Topology snapshot file, relative to the state directory.
    pub snapshot_file: String,
    /// Nodes and identities to provision.
    pub topology: TopologyPlan,
    /// Cases executed in order.
    pub cases: Vec<ScenarioCase>,
}

impl ScenarioPlan {
    /// Load a plan from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file does not exist and
    /// `Error::MalformedConfig` if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let plan: Self = load_json(path)?
            .ok_or_else(|| Error::Config(format!("plan file {} not found", path.display())))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check that every step refers to a declared identity or node.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first dangling reference.
    pub fn validate(&self) -> Result<()> {
        let declared = |endpoint: &Endpoint| {
            self.topology
                .identities
                .iter()
                .any(|id| id.node == endpoint.node && id.alias == endpoint.alias)
        };
        let has_node = |node: &str| self.topology.identities.iter().any(|id| id.node == node);

        for case in &self.cases {
            for step in &case.steps {
                let endpoints: Vec<&Endpoint> = match &step.action {
                    Action::Fund { target, .. } | Action::AccountInfo { target } => vec![target],
                    Action::Transfer { from, to, .. } => vec![from, to],
                    Action::IntroducePeer { subject, to_node } => {
                        if !has_node(to_node) {
                            return Err(self.dangling(&case.name, to_node));
                        }
                        vec![subject]
                    }
                };
                if let Some(missing) = endpoints.into_iter().find(|e| !declared(e)) {
                    return Err(self.dangling(&case.name, &missing.to_string()));
                }
            }
        }
        for step in self.overprecise_transfers() {
            warn!(
                scenario = %self.name,
                step = %step.description,
                max_decimal_places = MAX_DECIMAL_PLACES,
                "Transfer expected to pass exceeds the node's precision"
            );
        }
        Ok(())
    }

    /// Transfers expected to succeed whose amount has more decimal places
    /// than the node binary accepts.
    #[must_use]
    pub fn overprecise_transfers(&self) -> Vec<&Step> {
        self.cases
            .iter()
            .flat_map(|case| &case.steps)
            .filter(|step| step.expect == Expectation::Success)
            .filter(|step| {
                matches!(&step.action, Action::Transfer { amount, .. } if !amount.within_precision())
            })
            .collect()
    }

    fn dangling(&self, case: &str, reference: &str) -> Error {
        Error::Config(format!(
            "scenario {} case {case} refers to undeclared {reference}",
            self.name
        ))
    }
}

/// Topology of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPlan {
    /// Registry key listing the scenario's node indices.
    pub registry_key: String,
    /// Family of the scenario's nodes.
    #[serde(default)]
    pub family: NodeFamily,
    /// Identities to create.
    pub identities: Vec<IdentitySpec>,
    /// Quorum groups this scenario provisions itself.
    #[serde(default)]
    pub quorum_groups: Vec<QuorumGroup>,
    /// Quorum group each node is bound to.
    #[serde(default)]
    pub bindings: Vec<QuorumBinding>,
    /// Peer introductions performed during setup.
    #[serde(default)]
    pub introductions: Vec<Introduction>,
}

/// An identity to create during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Hosting node.
    pub node: String,
    /// Alias on that node.
    pub alias: String,
    /// Identity algorithm variant.
    #[serde(default)]
    pub kind: DidKind,
    /// Whether to register the identity after creating it.
    #[serde(default = "default_register")]
    pub register: bool,
}

const fn default_register() -> bool {
    true
}

/// Binds a node to a quorum group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumBinding {
    /// Scenario node.
    pub node: String,
    /// Group name.
    pub group: String,
}

/// Introduces an identity to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Introduction {
    /// Identity being introduced.
    pub subject: Endpoint,
    /// Node learning about it.
    pub to_node: String,
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioCase {
    /// Case name.
    pub name: String,
    /// Steps in order.
    pub steps: Vec<Step>,
}

/// One step of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Human readable description used in logs and errors.
    pub description: String,
    /// What to do.
    #[serde(flatten)]
    pub action: Action,
    /// Expected outcome.
    #[serde(default)]
    pub expect: Expectation,
}

impl Step {
    /// A step expected to succeed.
    #[must_use]
    pub fn pass(action: Action) -> Self {
        Self {
            description: action.to_string(),
            action,
            expect: Expectation::Success,
        }
    }

    /// A step expected to fail.
    #[must_use]
    pub fn fail(action: Action) -> Self {
        Self {
            description: action.to_string(),
            action,
            expect: Expectation::Failure,
        }
    }
}

/// Expected outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// Any failure fails the scenario.
    #[default]
    Success,
    /// Success fails the scenario; failure is the expected outcome.
    Failure,
}

/// Step action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Issue whole test tokens.
    Fund {
        /// Funded identity.
        target: Endpoint,
        /// Whole tokens.
        tokens: u64,
    },
    /// Transfer RBT via the sender's node.
    Transfer {
        /// Sender.
        from: Endpoint,
        /// Receiver.
        to: Endpoint,
        /// Amount.
        amount: RbtAmount,
    },
    /// Introduce an identity to a node.
    IntroducePeer {
        /// Identity being introduced.
        subject: Endpoint,
        /// Node learning about it.
        to_node: String,
    },
    /// Query and log account information.
    AccountInfo {
        /// Queried identity.
        target: Endpoint,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fund { target, tokens } => write!(f, "fund {target} with {tokens} RBT"),
            Self::Transfer { from, to, amount } => {
                write!(f, "transfer {amount} RBT from {from} to {to}")
            }
            Self::IntroducePeer { subject, to_node } => {
                write!(f, "introduce {subject} to {to_node}")
            }
            Self::AccountInfo { target } => write!(f, "account info of {target}"),
        }
    }
}
