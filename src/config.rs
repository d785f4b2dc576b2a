//! Configuration for rubix-harness.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host platform family the node binary is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux.
    Linux,
    /// Windows.
    Windows,
    /// macOS.
    Mac,
}

impl Platform {
    /// Detect the platform this harness is running on.
    ///
    /// # Errors
    ///
    /// Returns an error on operating systems the node binary is not built for.
    pub fn detect() -> crate::Result<Self> {
        match std::env::consts::OS {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::Mac),
            other => Err(crate::Error::Config(format!(
                "unsupported operating system to build Rubix: {other}"
            ))),
        }
    }

    /// Name of the build folder (relative to the repository root) holding the binary.
    #[must_use]
    pub fn build_folder(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Mac => "mac",
        }
    }

    /// Make target that compiles the node binary for this platform.
    #[must_use]
    pub fn build_command(self) -> &'static str {
        match self {
            Self::Linux => "make compile-linux",
            Self::Windows => "make compile-windows",
            Self::Mac => "make compile-mac",
        }
    }

    /// Whether commands run through `cmd` rather than a POSIX shell.
    #[must_use]
    pub fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Command-line prefix invoking `binary_name` from its own directory.
    #[must_use]
    pub fn invocation(self, binary_name: &str) -> String {
        if self.is_windows() {
            format!("{binary_name}.exe")
        } else {
            format!("./{binary_name}")
        }
    }
}

/// How node processes are detached from the harness on unix platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Detached `screen` session named after the node.
    #[default]
    Screen,
    /// Plain background job with output redirected to `<node>.out`.
    Background,
}

/// Address format used for quorum list entries and transfer endpoints.
///
/// Different releases of the node binary expect different shapes, so the
/// choice is explicit configuration rather than a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressFormat {
    /// The DID on its own.
    Bare,
    /// `peerId.did`.
    #[default]
    PeerQualified,
}

impl AddressFormat {
    /// Render an address for `did` hosted by `peer_id`.
    #[must_use]
    pub fn render(self, peer_id: &str, did: &str) -> String {
        match self {
            Self::Bare => did.to_string(),
            Self::PeerQualified => format!("{peer_id}.{did}"),
        }
    }
}

/// Base ports from which every node's ports are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    /// HTTP port of slot 0.
    #[serde(default = "default_http_base")]
    pub http_base: u16,

    /// gRPC port of slot 0.
    #[serde(default = "default_rpc_base")]
    pub rpc_base: u16,

    /// Slot offset applied to the secondary node family.
    #[serde(default = "default_secondary_offset")]
    pub secondary_offset: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            http_base: default_http_base(),
            rpc_base: default_rpc_base(),
            secondary_offset: default_secondary_offset(),
        }
    }
}

const fn default_http_base() -> u16 {
    20_000
}

const fn default_rpc_base() -> u16 {
    10_500
}

const fn default_secondary_offset() -> u16 {
    10
}

/// Readiness probing after a node launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Fixed wait after launching before the first probe.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Delay before the second probe; doubles after each failed probe.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the probe delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Total polling budget after the settle delay.
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,

    /// Host serving the readiness endpoint.
    #[serde(default = "default_readiness_host")]
    pub host: String,

    /// Path of the readiness endpoint.
    #[serde(default = "default_readiness_path")]
    pub path: String,
}

impl ReadinessConfig {
    /// Settle delay as a duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Polling budget as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Readiness URL for a node listening on `http_port`.
    #[must_use]
    pub fn url(&self, http_port: u16) -> String {
        format!("http://{}:{http_port}{}", self.host, self.path)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: default_settle_delay_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_readiness_timeout_secs(),
            host: default_readiness_host(),
            path: default_readiness_path(),
        }
    }
}

const fn default_settle_delay_secs() -> u64 {
    60
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    16_000
}

const fn default_readiness_timeout_secs() -> u64 {
    120
}

fn default_readiness_host() -> String {
    "localhost".to_string()
}

fn default_readiness_path() -> String {
    "/api/getalldid".to_string()
}

/// Settings for the shared quorum group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Registry key listing the quorum node indices.
    #[serde(default = "default_quorum_registry_key")]
    pub registry_key: String,

    /// Alias of the quorum DID on every quorum node.
    #[serde(default = "default_quorum_alias")]
    pub did_alias: String,

    /// Whole tokens issued to each quorum DID.
    #[serde(default = "default_quorum_fund_tokens")]
    pub fund_tokens: u64,

    /// Quorum list file name, written into the binary directory.
    #[serde(default = "default_quorum_list_file")]
    pub list_file: String,

    /// Topology snapshot of the quorum nodes, relative to `state_dir`.
    #[serde(default = "default_quorum_snapshot_file")]
    pub snapshot_file: String,

    /// Address format of quorum list entries.
    #[serde(default)]
    pub address_format: AddressFormat,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            registry_key: default_quorum_registry_key(),
            did_alias: default_quorum_alias(),
            fund_tokens: default_quorum_fund_tokens(),
            list_file: default_quorum_list_file(),
            snapshot_file: default_quorum_snapshot_file(),
            address_format: AddressFormat::default(),
        }
    }
}

fn default_quorum_registry_key() -> String {
    "quorum".to_string()
}

fn default_quorum_alias() -> String {
    "did_quorum".to_string()
}

const fn default_quorum_fund_tokens() -> u64 {
    70
}

fn default_quorum_list_file() -> String {
    "quorumlist.json".to_string()
}

fn default_quorum_snapshot_file() -> String {
    "quorum_config.json".to_string()
}

/// Key passwords for DID kinds that need them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidSecrets {
    /// Private key password.
    #[serde(default = "default_password")]
    pub private_password: String,

    /// Quorum key password.
    #[serde(default = "default_password")]
    pub quorum_password: String,
}

impl Default for DidSecrets {
    fn default() -> Self {
        Self {
            private_password: default_password(),
            quorum_password: default_password(),
        }
    }
}

fn default_password() -> String {
    "mypassword".to_string()
}

/// Harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Target platform (`None` detects the host).
    #[serde(default)]
    pub platform: Option<Platform>,

    /// Repository root containing the Makefile and build folders.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// File name of the node binary (without `.exe`).
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Directory for topology snapshots.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Node registry file.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Port derivation.
    #[serde(default)]
    pub ports: PortLayout,

    /// Readiness probing.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Process detachment on unix platforms.
    #[serde(default)]
    pub launch_mode: LaunchMode,

    /// Shared quorum group.
    #[serde(default)]
    pub quorum: QuorumConfig,

    /// Address format of transfer sender and receiver.
    #[serde(default)]
    pub transfer_address_format: AddressFormat,

    /// Passwords passed to DID kinds that require them.
    #[serde(default)]
    pub secrets: DidSecrets,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            platform: None,
            repo_root: default_repo_root(),
            binary_name: default_binary_name(),
            state_dir: default_state_dir(),
            registry_path: default_registry_path(),
            ports: PortLayout::default(),
            readiness: ReadinessConfig::default(),
            launch_mode: LaunchMode::default(),
            quorum: QuorumConfig::default(),
            transfer_address_format: AddressFormat::default(),
            secrets: DidSecrets::default(),
            log_level: default_log_level(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::MalformedConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configured platform, or the host platform when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform is configured and the host is unsupported.
    pub fn resolved_platform(&self) -> crate::Result<Platform> {
        self.platform.map_or_else(Platform::detect, Ok)
    }

    /// Directory holding the node binary; every binary command runs from here.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be resolved.
    pub fn binary_dir(&self) -> crate::Result<PathBuf> {
        Ok(self
            .repo_root
            .join(self.resolved_platform()?.build_folder()))
    }

    /// Resolve a snapshot file name against `state_dir`.
    #[must_use]
    pub fn state_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.state_dir.join(file)
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from("..")
}

fn default_binary_name() -> String {
    "rubixgoplatform".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("node_registry.json")
}

fn default_log_level() -> String {
    "info".to_string()
}
