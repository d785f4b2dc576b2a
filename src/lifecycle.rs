//! Node lifecycle: port derivation, detached launch, readiness, shutdown.
//!
//! Ports are a pure function of the node's index and family, so a topology
//! can be reconstructed from the registry alone. After launching, the
//! launcher waits a fixed settle delay and then probes the readiness
//! endpoint with exponential backoff until it answers `200 OK` or the
//! polling budget is spent.

use crate::config::{PortLayout, ReadinessConfig};
use crate::error::{Error, Result};
use crate::node_cli::NodeCli;
use crate::topology::{NodeHandle, NodeStatus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-request timeout of a readiness probe (seconds).
const PROBE_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Ports of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodePorts {
    /// Slot index passed to the binary (index plus family offset).
    pub slot: u16,
    /// HTTP port.
    pub http: u16,
    /// gRPC port.
    pub rpc: u16,
}

/// Node family sharing one base port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeFamily {
    /// Slots equal registry indices; names are `node<slot>`.
    #[default]
    Primary,
    /// Slots shifted by the secondary offset; names are `nodeNq<slot>`.
    Secondary,
}

impl NodeFamily {
    /// Logical name of the node in `slot`.
    #[must_use]
    pub fn node_name(self, slot: u16) -> String {
        match self {
            Self::Primary => format!("node{slot}"),
            Self::Secondary => format!("nodeNq{slot}"),
        }
    }
}

impl PortLayout {
    /// Slot offset applied to `family`.
    #[must_use]
    pub fn offset(&self, family: NodeFamily) -> u16 {
        match family {
            NodeFamily::Primary => 0,
            NodeFamily::Secondary => self.secondary_offset,
        }
    }

    /// Derive the ports of node `index` in `family`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any derived port overflows `u16`.
    pub fn derive(&self, index: u16, family: NodeFamily) -> Result<NodePorts> {
        let overflow = || {
            Error::Config(format!(
                "port overflow deriving ports for index {index} ({family:?})"
            ))
        };
        let slot = index.checked_add(self.offset(family)).ok_or_else(overflow)?;
        let http = self.http_base.checked_add(slot).ok_or_else(overflow)?;
        let rpc = self.rpc_base.checked_add(slot).ok_or_else(overflow)?;
        Ok(NodePorts { slot, http, rpc })
    }

    /// Derive ports for a whole node set, rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns `Error::PortCollision` if two indices map to the same port
    /// and `Error::Config` on overflow.
    pub fn assign(&self, indices: &[u16], family: NodeFamily) -> Result<Vec<(String, NodePorts)>> {
        let mut seen = BTreeSet::new();
        let mut assigned: Vec<(String, NodePorts)> = Vec::with_capacity(indices.len());
        for &index in indices {
            let ports = self.derive(index, family)?;
            let name = family.node_name(ports.slot);
            for port in [ports.http, ports.rpc] {
                if !seen.insert(port) {
                    let other = assigned
                        .iter()
                        .find(|(_, p)| p.http == port || p.rpc == port)
                        .map_or_else(String::new, |(n, _)| n.clone());
                    return Err(Error::PortCollision {
                        node: name,
                        other,
                        port,
                    });
                }
            }
            assigned.push((name, ports));
        }
        Ok(assigned)
    }
}

/// Starts, probes and stops node processes.
#[derive(Debug, Clone)]
pub struct NodeLauncher {
    cli: NodeCli,
    readiness: ReadinessConfig,
    client: reqwest::Client,
}

impl NodeLauncher {
    /// Create a launcher.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(cli: NodeCli, readiness: ReadinessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rubix-harness/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(PROBE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            cli,
            readiness,
            client,
        })
    }

    /// Command front-end used by this launcher.
    #[must_use]
    pub fn cli(&self) -> &NodeCli {
        &self.cli
    }

    /// Launch `node`, wait for readiness and fetch its peer id.
    ///
    /// On success the node is `Running` with a non-empty peer id.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the launch or peer-id query fails,
    /// `Error::ReadinessTimeout` if the node never becomes ready, and
    /// `Error::PeerIdUnavailable` if the peer id is empty.
    pub async fn start_node(&self, node: &mut NodeHandle) -> Result<()> {
        let ports = node.ports();
        info!(
            node = %node.name,
            http = ports.http,
            rpc = ports.rpc,
            "Starting node"
        );

        self.cli.run_node(&node.name, &ports).await?;

        let settle = self.readiness.settle_delay();
        if !settle.is_zero() {
            debug!(node = %node.name, ?settle, "Waiting for node to settle");
            tokio::time::sleep(settle).await;
        }
        self.wait_until_ready(&node.name, ports.http).await?;

        let output = self.cli.get_peer_id(&ports).await?;
        node.peer_id = crate::node_cli::extract_peer_id(&output).ok_or_else(|| {
            Error::PeerIdUnavailable {
                node: node.name.clone(),
            }
        })?;
        node.status = NodeStatus::Running;

        info!(node = %node.name, peer_id = %node.peer_id, "Node is running");
        Ok(())
    }

    /// Probe the readiness endpoint once.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotRunning` on a non-200 answer or connection failure.
    pub async fn probe(&self, name: &str, http_port: u16) -> Result<()> {
        let url = self.readiness.url(http_port);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::NodeNotRunning {
                node: name.to_string(),
                reason: format!("GET {url} failed: {e}"),
            })?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(Error::NodeNotRunning {
                node: name.to_string(),
                reason: format!("GET {url} returned {}", response.status()),
            })
        }
    }

    /// Probe until ready, backing off exponentially up to the configured budget.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadinessTimeout` carrying the last probe failure and
    /// `Error::Config` if the timeout cannot be represented as a deadline.
    pub async fn wait_until_ready(&self, name: &str, http_port: u16) -> Result<()> {
        let started = Instant::now();
        let deadline = started.checked_add(self.readiness.timeout()).ok_or_else(|| {
            Error::Config(format!(
                "readiness timeout of {}s is out of range",
                self.readiness.timeout_secs
            ))
        })?;
        let max_backoff = Duration::from_millis(self.readiness.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.readiness.initial_backoff_ms);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.probe(name, http_port).await {
                Ok(()) => {
                    debug!(node = %name, attempt, "Readiness probe succeeded");
                    return Ok(());
                }
                Err(e) => e,
            };

            let now = Instant::now();
            if now.checked_add(backoff).map_or(true, |next| next > deadline) {
                return Err(Error::ReadinessTimeout {
                    node: name.to_string(),
                    waited: now - started,
                    last_error: err.to_string(),
                });
            }

            debug!(node = %name, attempt, ?backoff, error = %err, "Node not ready yet");
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    }

    /// Ask `node` to shut down and mark it `Stopped`.
    ///
    /// Best effort: failures are logged and the process is not verified to
    /// exit. Returns whether the node acknowledged the request.
    pub async fn shutdown_node(&self, node: &mut NodeHandle) -> bool {
        info!(node = %node.name, "Shutting down node");
        let acknowledged = match self.cli.shutdown(&node.ports()).await {
            Ok(output) if output.success() => {
                debug!(node = %node.name, output = %output.text, "Shutdown acknowledged");
                true
            }
            Ok(output) => {
                warn!(
                    node = %node.name,
                    status = output.status,
                    "Shutdown command failed: {}",
                    output.text
                );
                false
            }
            Err(e) => {
                warn!(node = %node.name, "Shutdown command could not be issued: {e}");
                false
            }
        };
        node.status = NodeStatus::Stopped;
        acknowledged
    }
}
