//! Topology state: provisioned nodes, their identities, and JSON persistence.
//!
//! A [`TopologySnapshot`] maps logical node names to [`NodeHandle`]s. It is
//! written to disk after provisioning so a scenario can resume against nodes
//! that are still running without re-provisioning them.

use crate::error::{Error, Result};
use crate::lifecycle::NodePorts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Identity algorithm variant understood by the node binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DidKind {
    /// Basic mode (0); needs private and quorum passwords.
    Basic,
    /// Standard mode (1).
    Standard,
    /// Wallet mode (2).
    Wallet,
    /// Child mode (3).
    Child,
    /// Lite mode (4), BIP39 key pair.
    #[default]
    Lite,
}

impl DidKind {
    /// Numeric code passed as `-didType`.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Basic => 0,
            Self::Standard => 1,
            Self::Wallet => 2,
            Self::Child => 3,
            Self::Lite => 4,
        }
    }

    /// Whether operations on this kind need the key passwords.
    #[must_use]
    pub fn requires_secrets(self) -> bool {
        matches!(self, Self::Basic)
    }
}

impl TryFrom<u8> for DidKind {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Basic),
            1 => Ok(Self::Standard),
            2 => Ok(Self::Wallet),
            3 => Ok(Self::Child),
            4 => Ok(Self::Lite),
            other => Err(format!("DID type should be between 0 and 4, got {other}")),
        }
    }
}

impl From<DidKind> for u8 {
    fn from(kind: DidKind) -> Self {
        kind.code()
    }
}

/// Registration state of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    /// Created on its node but not registered.
    #[default]
    Created,
    /// Registered and usable network-wide.
    Registered,
}

/// A DID hosted by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// DID value as printed by the binary.
    pub did: String,

    /// Identity algorithm variant.
    #[serde(rename = "didType", default)]
    pub kind: DidKind,

    /// Registration state.
    #[serde(default)]
    pub status: IdentityStatus,

    /// Whether the identity was set up as a quorum participant.
    #[serde(rename = "quorumMember", default)]
    pub quorum_member: bool,

    /// Whole tokens issued to this identity through the harness.
    #[serde(rename = "fundedTokens", default)]
    pub funded_tokens: u64,
}

impl Identity {
    /// New identity in the `Created` state.
    #[must_use]
    pub fn new(did: impl Into<String>, kind: DidKind) -> Self {
        Self {
            did: did.into(),
            kind,
            status: IdentityStatus::Created,
            quorum_member: false,
            funded_tokens: 0,
        }
    }
}

/// Lifecycle state of a node process as seen by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Declared but not yet confirmed running.
    #[default]
    Declared,
    /// Passed its readiness probe and reported a peer id.
    Running,
    /// Shutdown was requested.
    Stopped,
}

/// One provisioned node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    /// Logical node name, also the node's data directory.
    pub name: String,

    /// Port slot passed as `-n`.
    pub slot: u16,

    /// HTTP port.
    #[serde(rename = "server")]
    pub http_port: u16,

    /// gRPC port.
    #[serde(rename = "grpcPort")]
    pub rpc_port: u16,

    /// Peer identifier, empty until fetched.
    #[serde(rename = "peerId", default)]
    pub peer_id: String,

    /// Identities by alias.
    #[serde(rename = "dids", default)]
    pub identities: BTreeMap<String, Identity>,

    /// Process state.
    #[serde(default)]
    pub status: NodeStatus,

    /// DIDs this node has been introduced to via peer details.
    #[serde(rename = "knownPeers", default)]
    pub known_peers: BTreeSet<String>,

    /// Quorum list file loaded into this node, if any.
    #[serde(rename = "quorumList", default)]
    pub quorum_list: Option<PathBuf>,
}

impl NodeHandle {
    /// A declared node with no identities.
    #[must_use]
    pub fn new(name: impl Into<String>, ports: NodePorts) -> Self {
        Self {
            name: name.into(),
            slot: ports.slot,
            http_port: ports.http,
            rpc_port: ports.rpc,
            peer_id: String::new(),
            identities: BTreeMap::new(),
            status: NodeStatus::Declared,
            known_peers: BTreeSet::new(),
            quorum_list: None,
        }
    }

    /// The node's ports.
    #[must_use]
    pub fn ports(&self) -> NodePorts {
        NodePorts {
            slot: self.slot,
            http: self.http_port,
            rpc: self.rpc_port,
        }
    }

    /// Look up an identity by alias.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIdentity` if the alias is not present.
    pub fn identity(&self, alias: &str) -> Result<&Identity> {
        self.identities
            .get(alias)
            .ok_or_else(|| self.unknown_identity(alias))
    }

    /// Mutable lookup of an identity by alias.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownIdentity` if the alias is not present.
    pub fn identity_mut(&mut self, alias: &str) -> Result<&mut Identity> {
        let err = self.unknown_identity(alias);
        self.identities.get_mut(alias).ok_or(err)
    }

    /// Record a newly created identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateIdentity` if the alias is taken.
    pub fn insert_identity(&mut self, alias: &str, identity: Identity) -> Result<()> {
        if self.identities.contains_key(alias) {
            return Err(Error::DuplicateIdentity {
                node: self.name.clone(),
                alias: alias.to_string(),
            });
        }
        self.identities.insert(alias.to_string(), identity);
        Ok(())
    }

    /// Ensure the node process is known to be running.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` otherwise.
    pub fn require_running(&self) -> Result<()> {
        match self.status {
            NodeStatus::Running => Ok(()),
            other => Err(Error::OutOfOrder(format!(
                "node {} is {other:?}, expected Running",
                self.name
            ))),
        }
    }

    /// Whether this node was introduced to `did` or hosts it itself.
    #[must_use]
    pub fn knows(&self, did: &str) -> bool {
        self.known_peers.contains(did) || self.identities.values().any(|id| id.did == did)
    }

    fn unknown_identity(&self, alias: &str) -> Error {
        Error::UnknownIdentity {
            node: self.name.clone(),
            alias: alias.to_string(),
        }
    }
}

/// All nodes of one scenario, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologySnapshot {
    nodes: BTreeMap<String, NodeHandle>,
}

impl TopologySnapshot {
    /// Empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no nodes are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node, rejecting name or port collisions.
    ///
    /// # Errors
    ///
    /// Returns `Error::PortCollision` if a node with the same name or any
    /// shared port is already present.
    pub fn insert(&mut self, node: NodeHandle) -> Result<()> {
        for existing in self.nodes.values() {
            let ports = [node.http_port, node.rpc_port];
            let clash = ports
                .iter()
                .find(|p| **p == existing.http_port || **p == existing.rpc_port);
            if existing.name == node.name || clash.is_some() {
                return Err(Error::PortCollision {
                    node: node.name.clone(),
                    other: existing.name.clone(),
                    port: clash.copied().unwrap_or(node.http_port),
                });
            }
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Look up a node.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownNode` if absent.
    pub fn node(&self, name: &str) -> Result<&NodeHandle> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    /// Mutable lookup of a node.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownNode` if absent.
    pub fn node_mut(&mut self, name: &str) -> Result<&mut NodeHandle> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    /// Iterate nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.values()
    }

    /// Iterate nodes mutably in name order.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeHandle> {
        self.nodes.values_mut()
    }

    /// Node names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Persist to `path`.
    ///
    /// # Errors
    ///
    /// See [`save_json`].
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    /// Load from `path`; a missing file yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// See [`load_json`].
    pub fn load(path: &Path) -> Result<Self> {
        Ok(load_json(path)?.unwrap_or_default())
    }
}

/// Write `value` as JSON with 4-space indentation, replacing any existing file.
///
/// # Errors
///
/// Returns `Error::Serialization` if `value` cannot be represented as JSON
/// and `Error::Io` if the file cannot be replaced.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::write(path, buf)?;
    Ok(())
}

/// Read JSON from `path`, returning `None` if the file does not exist.
///
/// # Errors
///
/// Returns `Error::MalformedConfig` if the file exists but does not parse
/// as `T`, and `Error::Io` for other read failures.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::MalformedConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
