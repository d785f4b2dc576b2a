//! # rubix-harness
//!
//! End-to-end test orchestration for multi-node Rubix deployments.
//!
//! The harness does not implement any ledger logic. It drives a pre-built
//! node binary through its command line, parses the text it prints, keeps
//! the resulting topology in JSON snapshots, and asserts on the outcome of
//! token-transfer and quorum-setup workflows.
//!
//! ## Architecture
//!
//! - [`gateway`]: runs command lines from the binary's directory and
//!   classifies the outcome, including exit-0 error markers
//! - [`node_cli`]: sub-commands and flags of the node binary
//! - [`lifecycle`]: port derivation, detached launch, readiness polling
//! - [`topology`]: nodes, identities and their JSON snapshots
//! - [`provision`]: identity, funding, peer and quorum workflows with
//!   ordering guards
//! - [`scenario`]: data-driven scenarios with expect-success and
//!   expect-failure steps
//! - [`harness`]: the build, quorum and scenario pipeline
//!
//! ## Example
//!
//! ```rust,no_run
//! use rubix_harness::{Harness, HarnessConfig, HarnessOptions};
//! use rubix_harness::scenario::catalog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harness = Harness::new(HarnessConfig::default())?;
//!     let reports = harness
//!         .run(vec![catalog::rbt_transfer()], HarnessOptions::default())
//!         .await?;
//!     println!("{} scenario(s) passed", reports.len());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod amount;
pub mod config;
pub mod error;
pub mod gateway;
pub mod harness;
pub mod lifecycle;
pub mod node_cli;
pub mod provision;
pub mod quorum;
pub mod registry;
pub mod scenario;
pub mod topology;

pub use amount::RbtAmount;
pub use config::{AddressFormat, HarnessConfig, LaunchMode, Platform};
pub use error::{Error, Result};
pub use gateway::{CommandGateway, CommandOutput, OutputSource};
pub use harness::{Harness, HarnessOptions, ScenarioSelection};
pub use lifecycle::{NodeFamily, NodeLauncher, NodePorts};
pub use provision::{Endpoint, Provisioner};
pub use registry::NodeRegistry;
pub use scenario::{ScenarioPlan, ScenarioReport, ScenarioRunner, ScenarioState, SetupMode};
pub use topology::{DidKind, Identity, NodeHandle, TopologySnapshot};
