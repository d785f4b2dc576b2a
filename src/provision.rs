//! Identity and quorum provisioning.
//!
//! Every step is one binary invocation followed by a state update on the
//! [`TopologySnapshot`]. Status fields on nodes and identities guard the
//! order of steps: an operation issued before its prerequisites fails with
//! `Error::OutOfOrder` without invoking the binary.

use crate::amount::RbtAmount;
use crate::config::{DidSecrets, HarnessConfig};
use crate::error::{Error, Result};
use crate::gateway::CommandGateway;
use crate::lifecycle::{NodeFamily, NodeLauncher};
use crate::node_cli::NodeCli;
use crate::quorum::{build_quorum_list, QuorumGroup};
use crate::registry::NodeRegistry;
use crate::topology::{save_json, DidKind, Identity, IdentityStatus, NodeHandle, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An identity addressed by node name and alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Node hosting the identity.
    pub node: String,
    /// Identity alias on that node.
    pub alias: String,
}

impl Endpoint {
    /// Endpoint for `alias` on `node`.
    #[must_use]
    pub fn new(node: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.alias)
    }
}

/// Drives nodes and identities through their setup steps.
#[derive(Debug, Clone)]
pub struct Provisioner {
    config: HarnessConfig,
    launcher: NodeLauncher,
    binary_dir: PathBuf,
}

impl Provisioner {
    /// Create a provisioner running binary commands from the configured binary directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the platform cannot be resolved and
    /// `Error::Http` if the readiness client cannot be built.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let platform = config.resolved_platform()?;
        let binary_dir = config.binary_dir()?;
        let gateway = CommandGateway::new(binary_dir.clone(), platform);
        let cli = NodeCli::new(gateway, &config.binary_name, config.launch_mode);
        let launcher = NodeLauncher::new(cli, config.readiness.clone())?;
        Ok(Self {
            config,
            launcher,
            binary_dir,
        })
    }

    /// Harness configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Node lifecycle manager.
    #[must_use]
    pub fn launcher(&self) -> &NodeLauncher {
        &self.launcher
    }

    /// Directory holding the node binary.
    #[must_use]
    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    fn cli(&self) -> &NodeCli {
        self.launcher.cli()
    }

    fn secrets_for(&self, kind: DidKind) -> Option<&DidSecrets> {
        kind.requires_secrets().then_some(&self.config.secrets)
    }

    /// Add the nodes listed under `key` to `snapshot` without starting them.
    ///
    /// Returns the node names in registry order.
    ///
    /// # Errors
    ///
    /// Returns registry errors for a bad key and `Error::PortCollision` if
    /// a derived port is already taken in `snapshot`.
    pub fn declare_nodes(
        &self,
        registry: &NodeRegistry,
        key: &str,
        family: NodeFamily,
        snapshot: &mut TopologySnapshot,
    ) -> Result<Vec<String>> {
        let indices = registry.indices(key)?;
        let assigned = self.config.ports.assign(&indices, family)?;
        let mut names = Vec::with_capacity(assigned.len());
        for (name, ports) in assigned {
            snapshot.insert(NodeHandle::new(name.clone(), ports))?;
            names.push(name);
        }
        Ok(names)
    }

    /// Declare and start every node listed under `key`.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::declare_nodes`] and [`NodeLauncher::start_node`].
    pub async fn provision_nodes(
        &self,
        registry: &NodeRegistry,
        key: &str,
        family: NodeFamily,
        snapshot: &mut TopologySnapshot,
    ) -> Result<Vec<String>> {
        let names = self.declare_nodes(registry, key, family, snapshot)?;
        info!(key, nodes = ?names, "Provisioning nodes");
        for name in &names {
            self.launcher.start_node(snapshot.node_mut(name)?).await?;
        }
        Ok(names)
    }

    /// Create an identity of `kind` on `node` and record it under `alias`.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if the node is not running,
    /// `Error::DuplicateIdentity` if the alias is taken and
    /// `Error::DidExtractionFailed` if the DID cannot be read.
    pub async fn create_identity(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        alias: &str,
        kind: DidKind,
    ) -> Result<String> {
        let handle = snapshot.node_mut(node)?;
        handle.require_running()?;
        if handle.identities.contains_key(alias) {
            return Err(Error::DuplicateIdentity {
                node: node.to_string(),
                alias: alias.to_string(),
            });
        }

        let did = self
            .cli()
            .create_did(&handle.ports(), kind, self.secrets_for(kind))
            .await?;
        handle.insert_identity(alias, Identity::new(did.clone(), kind))?;
        info!(node, alias, %did, kind = kind.code(), "DID created");
        Ok(did)
    }

    /// Register a created identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if the node is not running or the
    /// identity is already registered.
    pub async fn register_identity(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        alias: &str,
    ) -> Result<()> {
        let handle = snapshot.node_mut(node)?;
        handle.require_running()?;
        let ports = handle.ports();
        let identity = handle.identity_mut(alias)?;
        if identity.status == IdentityStatus::Registered {
            return Err(Error::OutOfOrder(format!(
                "identity {alias} on {node} is already registered"
            )));
        }

        self.cli()
            .register_did(&identity.did, &ports, self.secrets_for(identity.kind))
            .await?;
        identity.status = IdentityStatus::Registered;
        info!(node, alias, did = %identity.did, "DID registered");
        Ok(())
    }

    /// Issue `tokens` whole test tokens to an identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAmount` for zero tokens, `Error::OutOfOrder`
    /// if the node is not running and `Error::UnknownIdentity` if the
    /// identity was never created.
    pub async fn fund_identity(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        alias: &str,
        tokens: u64,
    ) -> Result<()> {
        if tokens == 0 {
            return Err(Error::InvalidAmount(
                "funding requires at least one whole token".to_string(),
            ));
        }
        let handle = snapshot.node_mut(node)?;
        handle.require_running()?;
        let ports = handle.ports();
        let identity = handle.identity_mut(alias)?;

        self.cli()
            .generate_test_rbt(&identity.did, tokens, &ports, self.secrets_for(identity.kind))
            .await?;
        identity.funded_tokens = identity.funded_tokens.saturating_add(tokens);
        info!(node, alias, did = %identity.did, tokens, "DID funded");
        Ok(())
    }

    /// Mark a registered identity as an active quorum participant.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if the node is not running or the
    /// identity is not registered.
    pub async fn setup_quorum_member(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        alias: &str,
    ) -> Result<()> {
        let handle = snapshot.node_mut(node)?;
        handle.require_running()?;
        let ports = handle.ports();
        let identity = handle.identity_mut(alias)?;
        if identity.status != IdentityStatus::Registered {
            return Err(Error::OutOfOrder(format!(
                "identity {alias} on {node} must be registered before quorum setup"
            )));
        }

        self.cli()
            .setup_quorum(&identity.did, &ports, self.secrets_for(identity.kind))
            .await?;
        identity.quorum_member = true;
        info!(node, alias, did = %identity.did, "Quorum member set up");
        Ok(())
    }

    /// Introduce `did` (hosted by `peer_id`) to node `target`.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if `target` is not running.
    pub async fn add_peer_details(
        &self,
        snapshot: &mut TopologySnapshot,
        target: &str,
        peer_id: &str,
        did: &str,
        kind: DidKind,
    ) -> Result<()> {
        let handle = snapshot.node_mut(target)?;
        handle.require_running()?;

        self.cli()
            .add_peer_details(peer_id, did, kind, &handle.ports())
            .await?;
        handle.known_peers.insert(did.to_string());
        info!(node = target, peer_id, did, "Peer details added");
        Ok(())
    }

    /// Introduce the identity at `subject` to node `target`.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::add_peer_details`].
    pub async fn introduce(
        &self,
        snapshot: &mut TopologySnapshot,
        subject: &Endpoint,
        target: &str,
    ) -> Result<()> {
        let host = snapshot.node(&subject.node)?;
        let identity = host.identity(&subject.alias)?;
        let (peer_id, did, kind) = (host.peer_id.clone(), identity.did.clone(), identity.kind);
        self.add_peer_details(snapshot, target, &peer_id, &did, kind)
            .await
    }

    /// Load the quorum list `list_file` (relative to the binary directory) into `node`.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if the node is not running or the list
    /// file has not been written.
    pub async fn add_quorum_members(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        list_file: &str,
    ) -> Result<()> {
        let handle = snapshot.node_mut(node)?;
        handle.require_running()?;
        if !self.binary_dir.join(list_file).is_file() {
            return Err(Error::OutOfOrder(format!(
                "quorum list {list_file} must be generated before adding quorums to {node}"
            )));
        }

        self.cli()
            .add_quorum(Path::new(list_file), &handle.ports())
            .await?;
        handle.quorum_list = Some(PathBuf::from(list_file));
        info!(node, list_file, "Quorum list added");
        Ok(())
    }

    /// Transfer `amount` RBT from `from` to `to`, issued via the sender's node.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` if the sender's node has no quorum list
    /// or, for a cross-node transfer, was never introduced to the receiver,
    /// and `Error::CommandFailed` if the binary rejects the transfer.
    pub async fn transfer(
        &self,
        snapshot: &TopologySnapshot,
        from: &Endpoint,
        to: &Endpoint,
        amount: &RbtAmount,
    ) -> Result<String> {
        let sender_node = snapshot.node(&from.node)?;
        let receiver_node = snapshot.node(&to.node)?;
        sender_node.require_running()?;
        let sender = sender_node.identity(&from.alias)?;
        let receiver = receiver_node.identity(&to.alias)?;

        if sender_node.quorum_list.is_none() {
            return Err(Error::OutOfOrder(format!(
                "node {} needs a quorum list before transferring",
                sender_node.name
            )));
        }
        if sender_node.name != receiver_node.name && !sender_node.knows(&receiver.did) {
            return Err(Error::OutOfOrder(format!(
                "node {} was never introduced to {}",
                sender_node.name, receiver.did
            )));
        }

        let format = self.config.transfer_address_format;
        let sender_address = format.render(&sender_node.peer_id, &sender.did);
        let receiver_address = format.render(&receiver_node.peer_id, &receiver.did);
        debug!(%from, %to, %amount, "Transferring RBT");

        self.cli()
            .transfer_rbt(
                &sender_address,
                &receiver_address,
                amount,
                &sender_node.ports(),
                self.secrets_for(sender.kind),
            )
            .await
    }

    /// Query account information of an identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the query fails.
    pub async fn account_info(&self, snapshot: &TopologySnapshot, target: &Endpoint) -> Result<String> {
        let node = snapshot.node(&target.node)?;
        node.require_running()?;
        let identity = node.identity(&target.alias)?;
        self.cli().account_info(&identity.did, &node.ports()).await
    }

    /// Start a quorum group and make its identities quorum participants.
    ///
    /// With `nodes_only`, only the nodes are started. With `skip_adding`,
    /// the quorum list is written but not loaded into the members.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a hosted group and fails on the first
    /// step that fails.
    pub async fn provision_quorum_group(
        &self,
        registry: &NodeRegistry,
        group: &QuorumGroup,
        nodes_only: bool,
        skip_adding: bool,
    ) -> Result<TopologySnapshot> {
        if group.is_hosted() {
            return Err(Error::Config(format!(
                "quorum group {} is hosted on scenario nodes and has no nodes of its own",
                group.name
            )));
        }
        let snapshot_path = self.config.state_path(&group.snapshot_file);
        let mut snapshot = TopologySnapshot::new();

        info!(group = %group.name, "Running quorum nodes");
        let names = self
            .provision_nodes(registry, &group.registry_key, NodeFamily::Primary, &mut snapshot)
            .await?;
        if nodes_only {
            snapshot.save(&snapshot_path)?;
            return Ok(snapshot);
        }

        self.create_quorum_identities(&mut snapshot, group, &names)
            .await?;
        snapshot.save(&snapshot_path)?;
        self.write_quorum_list(&snapshot, group, &names)?;

        if !skip_adding {
            for name in &names {
                self.add_quorum_members(&mut snapshot, name, &group.list_file)
                    .await?;
            }
        }
        self.setup_quorum_identities(&mut snapshot, group, &names)
            .await?;

        snapshot.save(&snapshot_path)?;
        info!(group = %group.name, "Quorums have been configured");
        Ok(snapshot)
    }

    /// Create the quorum identities of a hosted group on its (running)
    /// host nodes in `snapshot`, write the group's list and set the
    /// identities up as quorum participants.
    ///
    /// Loading the list into nodes is left to [`Provisioner::bind_to_group`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a group that is not hosted and fails on
    /// the first step that fails.
    pub async fn provision_hosted_group(
        &self,
        snapshot: &mut TopologySnapshot,
        group: &QuorumGroup,
    ) -> Result<()> {
        if !group.is_hosted() {
            return Err(Error::Config(format!(
                "quorum group {} runs on its own nodes",
                group.name
            )));
        }
        info!(group = %group.name, hosts = ?group.hosts, "Configuring hosted quorum");
        self.create_quorum_identities(snapshot, group, &group.hosts)
            .await?;
        self.write_quorum_list(snapshot, group, &group.hosts)?;
        self.setup_quorum_identities(snapshot, group, &group.hosts)
            .await?;
        info!(group = %group.name, "Quorums have been configured");
        Ok(())
    }

    async fn create_quorum_identities(
        &self,
        snapshot: &mut TopologySnapshot,
        group: &QuorumGroup,
        nodes: &[String],
    ) -> Result<()> {
        info!(group = %group.name, "Creating, registering and funding quorum DIDs");
        let tokens = group.fund_tokens(&self.config.quorum);
        for name in nodes {
            for alias in group.aliases(&self.config.quorum) {
                self.create_identity(snapshot, name, &alias, DidKind::Lite)
                    .await?;
                self.register_identity(snapshot, name, &alias).await?;
                self.fund_identity(snapshot, name, &alias, tokens).await?;
            }
        }
        Ok(())
    }

    fn write_quorum_list(
        &self,
        snapshot: &TopologySnapshot,
        group: &QuorumGroup,
        nodes: &[String],
    ) -> Result<()> {
        let handles = nodes
            .iter()
            .map(|name| snapshot.node(name))
            .collect::<Result<Vec<_>>>()?;
        let list = build_quorum_list(
            handles,
            &group.aliases(&self.config.quorum),
            group.address_format(&self.config.quorum),
        )?;
        save_json(&self.binary_dir.join(&group.list_file), &list)?;
        info!(group = %group.name, list_file = %group.list_file, entries = list.len(), "Quorum list written");
        Ok(())
    }

    async fn setup_quorum_identities(
        &self,
        snapshot: &mut TopologySnapshot,
        group: &QuorumGroup,
        nodes: &[String],
    ) -> Result<()> {
        for name in nodes {
            for alias in group.aliases(&self.config.quorum) {
                self.setup_quorum_member(snapshot, name, &alias).await?;
            }
        }
        Ok(())
    }

    /// Bind `node` to a quorum group: load the group's list and introduce
    /// every quorum identity in `members` that `node` does not host itself.
    ///
    /// For a hosted group only the group's hosts in `members` count.
    ///
    /// # Errors
    ///
    /// Fails on the first step that fails.
    pub async fn bind_to_group(
        &self,
        snapshot: &mut TopologySnapshot,
        node: &str,
        group: &QuorumGroup,
        members: &TopologySnapshot,
    ) -> Result<()> {
        self.add_quorum_members(snapshot, node, &group.list_file)
            .await?;

        let aliases = group.aliases(&self.config.quorum);
        let remote = members
            .nodes()
            .filter(|m| m.name != node && (!group.is_hosted() || group.hosts_node(&m.name)));
        for member in remote {
            for alias in &aliases {
                let identity = member.identity(alias)?;
                self.add_peer_details(snapshot, node, &member.peer_id, &identity.did, identity.kind)
                    .await?;
            }
        }
        Ok(())
    }

    /// Shut down every node in `snapshot` (best effort), returning how many
    /// acknowledged the request.
    pub async fn shutdown_all(&self, snapshot: &mut TopologySnapshot) -> usize {
        let mut acknowledged = 0;
        for node in snapshot.nodes_mut() {
            if self.launcher.shutdown_node(node).await {
                acknowledged += 1;
            }
        }
        acknowledged
    }

    /// Shut down the nodes of every snapshot in `paths` and record them as
    /// stopped.
    ///
    /// Unreadable snapshots and failed re-saves are logged and skipped so the
    /// remaining snapshots are still processed. Returns the number of nodes
    /// marked stopped.
    pub async fn shutdown_snapshots(&self, paths: &[PathBuf]) -> usize {
        let mut stopped = 0;
        for path in paths {
            let mut snapshot = match TopologySnapshot::load(path) {
                Ok(snapshot) if snapshot.is_empty() => continue,
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };

            info!(snapshot = %path.display(), nodes = snapshot.len(), "Shutting down nodes");
            let acknowledged = self.shutdown_all(&mut snapshot).await;
            if acknowledged < snapshot.len() {
                warn!(
                    snapshot = %path.display(),
                    acknowledged,
                    nodes = snapshot.len(),
                    "Some nodes did not acknowledge shutdown"
                );
            }
            stopped += snapshot.len();
            if let Err(e) = snapshot.save(path) {
                warn!("Failed to record stopped nodes in {}: {e}", path.display());
            }
        }
        stopped
    }
}
