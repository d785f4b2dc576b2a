//! Command contract of the external node binary.
//!
//! [`NodeCli`] knows the sub-commands and flag spellings of the binary and
//! turns typed arguments into command lines for the [`CommandGateway`].
//! Parsing of free-text output is isolated in [`extract_did`] and
//! [`extract_peer_id`].

use crate::amount::RbtAmount;
use crate::config::{DidSecrets, LaunchMode, Platform};
use crate::error::{Error, Result};
use crate::gateway::{CommandGateway, CommandOutput, OutputSource};
use crate::lifecycle::NodePorts;
use crate::topology::DidKind;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Literal prefix shared by every DID the binary issues.
pub const DID_PREFIX: &str = "bafybmi";

/// Word the binary prints when an identity was created.
const DID_SUCCESS_WORD: &str = "successfully";

/// Prefix of libp2p peer identifiers.
const PEER_ID_PREFIX: &str = "12D3KooW";

static DID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{DID_PREFIX}\w+")).unwrap_or_else(|e| unreachable!("DID pattern: {e}"))
});

static PEER_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{PEER_ID_PREFIX}\w+"))
        .unwrap_or_else(|e| unreachable!("peer id pattern: {e}"))
});

/// Extract the DID from `createdid` output.
///
/// Returns `Ok(None)` when the output does not claim success, and the first
/// `bafybmi…` token when it does.
///
/// # Errors
///
/// Returns `Error::DidExtractionFailed` when the output claims success but
/// carries no DID token.
pub fn extract_did(output: &str) -> Result<Option<String>> {
    if !output.contains(DID_SUCCESS_WORD) {
        return Ok(None);
    }
    DID_PATTERN
        .find(output)
        .map(|m| Some(m.as_str().to_string()))
        .ok_or_else(|| Error::DidExtractionFailed {
            output: output.to_string(),
        })
}

/// Extract a peer identifier from `get-peer-id` output.
///
/// Prefers a `12D3KooW…` token; otherwise the last non-empty line is taken
/// verbatim since the identifier is opaque to the harness.
#[must_use]
pub fn extract_peer_id(output: &str) -> Option<String> {
    if let Some(m) = PEER_ID_PATTERN.find(output) {
        return Some(m.as_str().to_string());
    }
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(ToString::to_string)
}

/// Typed front-end to the node binary.
#[derive(Debug, Clone)]
pub struct NodeCli {
    gateway: CommandGateway,
    program: String,
    launch_mode: LaunchMode,
}

impl NodeCli {
    /// Create a front-end invoking `binary_name` through `gateway`.
    #[must_use]
    pub fn new(gateway: CommandGateway, binary_name: &str, launch_mode: LaunchMode) -> Self {
        let program = gateway.platform().invocation(binary_name);
        Self {
            gateway,
            program,
            launch_mode,
        }
    }

    /// Underlying gateway.
    #[must_use]
    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    /// Command line launching a node detached from the harness.
    #[must_use]
    pub fn run_node_command(&self, name: &str, ports: &NodePorts) -> String {
        let run = format!(
            "{} run -p {name} -n {} -s -testNet -grpcPort {}",
            self.program, ports.slot, ports.rpc
        );
        match (self.gateway.platform(), self.launch_mode) {
            (Platform::Windows, _) => format!("start \"{name}\" /B {run}"),
            (_, LaunchMode::Screen) => format!("screen -S {name} -d -m {run}"),
            (_, LaunchMode::Background) => format!("nohup {run} > {name}.out 2>&1 &"),
        }
    }

    /// Launch a node process.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the launcher itself fails.
    pub async fn run_node(&self, name: &str, ports: &NodePorts) -> Result<()> {
        let command = self.run_node_command(name, ports);
        self.gateway.run(&command, OutputSource::Stdout).await?;
        Ok(())
    }

    /// Create a DID of `kind`, returning the extracted DID.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the command fails and
    /// `Error::DidExtractionFailed` if no DID can be read from its output.
    pub async fn create_did(
        &self,
        ports: &NodePorts,
        kind: DidKind,
        secrets: Option<&DidSecrets>,
    ) -> Result<String> {
        let mut command = format!(
            "{} createdid {} -didType {}",
            self.program,
            port_flags(ports),
            kind.code()
        );
        push_secrets(&mut command, secrets, true);

        let output = self.gateway.run(&command, OutputSource::Stderr).await?;
        extract_did(&output)?.ok_or(Error::DidExtractionFailed { output })
    }

    /// Register a DID so it becomes usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn register_did(
        &self,
        did: &str,
        ports: &NodePorts,
        secrets: Option<&DidSecrets>,
    ) -> Result<String> {
        let mut command = format!("{} registerdid -did {did} {}", self.program, port_flags(ports));
        push_secrets(&mut command, secrets, false);
        self.gateway.run(&command, OutputSource::Stdout).await
    }

    /// Issue `tokens` whole test tokens to a DID.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn generate_test_rbt(
        &self,
        did: &str,
        tokens: u64,
        ports: &NodePorts,
        secrets: Option<&DidSecrets>,
    ) -> Result<String> {
        let mut command = format!(
            "{} generatetestrbt -did {did} -numTokens {tokens} {}",
            self.program,
            port_flags(ports)
        );
        push_secrets(&mut command, secrets, false);
        self.gateway.run(&command, OutputSource::Stderr).await
    }

    /// Load a quorum list file into the node's configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn add_quorum(&self, list_file: &Path, ports: &NodePorts) -> Result<String> {
        let command = format!(
            "{} addquorum -quorumList {} {}",
            self.program,
            list_file.display(),
            port_flags(ports)
        );
        self.gateway.run(&command, OutputSource::Stderr).await
    }

    /// Mark a DID as an active quorum participant.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn setup_quorum(
        &self,
        did: &str,
        ports: &NodePorts,
        secrets: Option<&DidSecrets>,
    ) -> Result<String> {
        let mut command = format!("{} setupquorum -did {did} {}", self.program, port_flags(ports));
        push_secrets(&mut command, secrets, true);
        self.gateway.run(&command, OutputSource::Stderr).await
    }

    /// Tell the node at `ports` where `did` lives.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn add_peer_details(
        &self,
        peer_id: &str,
        did: &str,
        kind: DidKind,
        ports: &NodePorts,
    ) -> Result<String> {
        let command = format!(
            "{} addpeerdetails -peerID {peer_id} -did {did} -didType {} {}",
            self.program,
            kind.code(),
            port_flags(ports)
        );
        self.gateway.run(&command, OutputSource::Stderr).await
    }

    /// Transfer `amount` RBT between two addresses via the node at `ports`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn transfer_rbt(
        &self,
        sender: &str,
        receiver: &str,
        amount: &RbtAmount,
        ports: &NodePorts,
        secrets: Option<&DidSecrets>,
    ) -> Result<String> {
        let mut command = format!(
            "{} transferrbt -senderAddr {sender} -receiverAddr {receiver} -rbtAmount {amount} {}",
            self.program,
            port_flags(ports)
        );
        push_secrets(&mut command, secrets, false);
        self.gateway.run(&command, OutputSource::Stderr).await
    }

    /// Ask the node to shut down.
    ///
    /// A failed shutdown is reported through the returned status, not as an
    /// error; callers treat shutdown as best effort.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` only if the shell cannot be spawned.
    pub async fn shutdown(&self, ports: &NodePorts) -> Result<CommandOutput> {
        let command = format!("{} shutdown {}", self.program, port_flags(ports));
        self.gateway.execute(&command, OutputSource::Stderr).await
    }

    /// Query the node's peer identifier (raw output).
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn get_peer_id(&self, ports: &NodePorts) -> Result<String> {
        let command = format!("{} get-peer-id {}", self.program, port_flags(ports));
        self.gateway.run(&command, OutputSource::Stdout).await
    }

    /// Query account information for a DID (raw output).
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` on failure.
    pub async fn account_info(&self, did: &str, ports: &NodePorts) -> Result<String> {
        let command = format!(
            "{} getaccountinfo -did {did} {}",
            self.program,
            port_flags(ports)
        );
        self.gateway.run(&command, OutputSource::Stdout).await
    }
}

fn port_flags(ports: &NodePorts) -> String {
    format!("-port {} -grpcPort {}", ports.http, ports.rpc)
}

fn push_secrets(command: &mut String, secrets: Option<&DidSecrets>, with_quorum: bool) {
    if let Some(secrets) = secrets {
        command.push_str(" -privPWD ");
        command.push_str(&secrets.private_password);
        if with_quorum {
            command.push_str(" -quorumPWD ");
            command.push_str(&secrets.quorum_password);
        }
    }
}
