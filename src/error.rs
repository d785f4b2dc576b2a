//! Error types for rubix-harness.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating nodes and scenarios.
#[derive(Error, Debug)]
pub enum Error {
    /// The external binary signalled failure, either through a non-zero exit
    /// status or an error marker in its output.
    #[error("command failed with status {status}: {command}\n{output}")]
    CommandFailed {
        /// The command line that was executed.
        command: String,
        /// Exit status after classification.
        status: i32,
        /// Captured text from the designated stream.
        output: String,
    },

    /// A node did not answer its readiness probe.
    #[error("node {node} is not running: {reason}")]
    NodeNotRunning {
        /// Logical node name.
        node: String,
        /// What the probe observed.
        reason: String,
    },

    /// Readiness polling ran out of time.
    #[error("node {node} did not become ready within {waited:?}: {last_error}")]
    ReadinessTimeout {
        /// Logical node name.
        node: String,
        /// Total time spent polling after the settle delay.
        waited: Duration,
        /// Result of the final probe.
        last_error: String,
    },

    /// Identity creation reported success but no DID could be parsed.
    #[error("DID creation reported success but no DID was found in output: {output}")]
    DidExtractionFailed {
        /// Raw command output.
        output: String,
    },

    /// The peer-id query returned nothing usable.
    #[error("peer id query for node {node} returned no value")]
    PeerIdUnavailable {
        /// Logical node name.
        node: String,
    },

    /// A persisted JSON or TOML file exists but cannot be parsed.
    #[error("malformed config at {}: {reason}", path.display())]
    MalformedConfig {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An expect-success step failed.
    #[error("the action was expected to pass, but it failed: {action}")]
    UnexpectedFailure {
        /// Human readable step description.
        action: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// An expect-failure step succeeded.
    #[error("the action was expected to fail, but it passed: {action}")]
    UnexpectedSuccess {
        /// Human readable step description.
        action: String,
    },

    /// The node registry file does not exist.
    #[error("node registry not found at {}", .0.display())]
    MissingRegistry(PathBuf),

    /// The requested key is absent from the node registry.
    #[error("config key {0:?} not found in node registry")]
    MissingRegistryKey(String),

    /// The registry entry for a key lists no nodes.
    #[error("no indices found for {0:?} in node registry, provide at least one index")]
    EmptyRegistryEntry(String),

    /// A node name is not part of the topology.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// An identity alias is not present on a node.
    #[error("unknown identity {alias:?} on node {node}")]
    UnknownIdentity {
        /// Logical node name.
        node: String,
        /// Identity alias.
        alias: String,
    },

    /// An identity alias is already taken on a node.
    #[error("identity alias {alias:?} already exists on node {node}")]
    DuplicateIdentity {
        /// Logical node name.
        node: String,
        /// Identity alias.
        alias: String,
    },

    /// Two nodes in one topology were assigned the same port or name.
    #[error("port collision: {node} and {other} both use port {port}")]
    PortCollision {
        /// Node being inserted.
        node: String,
        /// Node already holding the port.
        other: String,
        /// Conflicting port.
        port: u16,
    },

    /// A workflow step was attempted before its prerequisites.
    #[error("out-of-order operation: {0}")]
    OutOfOrder(String),

    /// A transfer amount is not a plain decimal literal.
    #[error("invalid RBT amount: {0:?}")]
    InvalidAmount(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the external binary rather than the harness itself.
    #[must_use]
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }
}
