//! Quorum lists and quorum groups.
//!
//! A quorum list is a JSON array of `{"type": 2, "address": ...}` entries
//! consumed by the binary's `addquorum` command. A [`QuorumGroup`] names the
//! registry key, snapshot file and list file of one set of quorum nodes.
//! A group either runs on its own registry nodes or is hosted on nodes of a
//! scenario, in which case its quorum identities live next to the
//! scenario's own identities.

use crate::config::{AddressFormat, QuorumConfig};
use crate::error::{Error, Result};
use crate::topology::NodeHandle;
use serde::{Deserialize, Serialize};

/// Address type tag the binary expects in quorum lists.
pub const QUORUM_ADDRESS_TYPE: u8 = 2;

/// One entry of a quorum list file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumMembership {
    /// Address type tag.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Quorum DID, bare or peer-qualified.
    pub address: String,
}

impl QuorumMembership {
    /// Entry for `did` hosted by `peer_id`.
    #[must_use]
    pub fn new(peer_id: &str, did: &str, format: AddressFormat) -> Self {
        Self {
            kind: QUORUM_ADDRESS_TYPE,
            address: format.render(peer_id, did),
        }
    }
}

/// Build the quorum list from the identities `aliases` of every node in
/// `nodes`, node by node.
///
/// # Errors
///
/// Returns `Error::UnknownIdentity` if a node lacks an alias and
/// `Error::OutOfOrder` if a node has no peer id yet.
pub fn build_quorum_list<'a>(
    nodes: impl IntoIterator<Item = &'a NodeHandle>,
    aliases: &[String],
    format: AddressFormat,
) -> Result<Vec<QuorumMembership>> {
    let mut list = Vec::new();
    for node in nodes {
        if node.peer_id.is_empty() && format == AddressFormat::PeerQualified {
            return Err(Error::OutOfOrder(format!(
                "node {} has no peer id for its quorum address",
                node.name
            )));
        }
        for alias in aliases {
            let identity = node.identity(alias)?;
            list.push(QuorumMembership::new(&node.peer_id, &identity.did, format));
        }
    }
    Ok(list)
}

/// A named set of quorum nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumGroup {
    /// Group name used in scenario plans.
    pub name: String,
    /// Registry key listing the group's node indices.
    pub registry_key: String,
    /// Snapshot file of the group's nodes.
    pub snapshot_file: String,
    /// Quorum list file written into the binary directory.
    pub list_file: String,
    /// Scenario nodes hosting the group's quorum identities. Empty for a
    /// group that runs on its own registry nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Quorum identities per node.
    #[serde(default = "default_dids_per_node")]
    pub dids_per_node: u16,
    /// Quorum identity alias; numbered `<alias>_<n>` with several per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_alias: Option<String>,
    /// Whole tokens issued to each quorum identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fund_tokens: Option<u64>,
    /// Address format of the group's list entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_format: Option<AddressFormat>,
}

const fn default_dids_per_node() -> u16 {
    1
}

impl QuorumGroup {
    /// The primary group described by `config`.
    #[must_use]
    pub fn primary(config: &QuorumConfig) -> Self {
        Self::with_files(
            &config.registry_key,
            &config.registry_key,
            &config.snapshot_file,
            &config.list_file,
        )
    }

    fn with_files(name: &str, registry_key: &str, snapshot_file: &str, list_file: &str) -> Self {
        Self {
            name: name.to_string(),
            registry_key: registry_key.to_string(),
            snapshot_file: snapshot_file.to_string(),
            list_file: list_file.to_string(),
            hosts: Vec::new(),
            dids_per_node: default_dids_per_node(),
            did_alias: None,
            fund_tokens: None,
            address_format: None,
        }
    }

    /// A group hosted on scenario nodes `hosts`, with `dids_per_node`
    /// identities `<alias>_1..` on each host.
    #[must_use]
    pub fn hosted(name: &str, list_file: &str, hosts: &[&str], alias: &str, dids_per_node: u16) -> Self {
        Self {
            hosts: hosts.iter().map(ToString::to_string).collect(),
            dids_per_node,
            did_alias: Some(alias.to_string()),
            ..Self::with_files(name, "", "", list_file)
        }
    }

    /// Whether the group lives on scenario nodes.
    #[must_use]
    pub fn is_hosted(&self) -> bool {
        !self.hosts.is_empty()
    }

    /// Whether `node` hosts quorum identities of this group.
    #[must_use]
    pub fn hosts_node(&self, node: &str) -> bool {
        self.hosts.iter().any(|h| h == node)
    }

    /// Aliases of the quorum identities on each member node.
    #[must_use]
    pub fn aliases(&self, config: &QuorumConfig) -> Vec<String> {
        let alias = self.did_alias.as_deref().unwrap_or(&config.did_alias);
        if self.dids_per_node <= 1 {
            vec![alias.to_string()]
        } else {
            (1..=self.dids_per_node)
                .map(|n| format!("{alias}_{n}"))
                .collect()
        }
    }

    /// Tokens issued to each quorum identity.
    #[must_use]
    pub fn fund_tokens(&self, config: &QuorumConfig) -> u64 {
        self.fund_tokens.unwrap_or(config.fund_tokens)
    }

    /// Address format of the group's list.
    #[must_use]
    pub fn address_format(&self, config: &QuorumConfig) -> AddressFormat {
        self.address_format.unwrap_or(config.address_format)
    }

    /// A group whose files are derived from `name`, e.g. `quorum2` uses
    /// `quorum_config2.json` and `quorumlist2.json`.
    #[must_use]
    pub fn numbered(name: &str, number: u32) -> Self {
        Self::with_files(
            name,
            name,
            &format!("quorum_config{number}.json"),
            &format!("quorumlist{number}.json"),
        )
    }
}
