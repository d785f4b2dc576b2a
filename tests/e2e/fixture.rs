//! A fake Rubix deployment on the local machine.
//!
//! [`FakeNetwork`] writes a POSIX shell script in place of the node binary
//! and answers readiness probes with stub HTTP listeners. The script keeps
//! balances in integer units of 10^-8 RBT under `<binary dir>/state` and
//! reports application errors the way the real binary does: an `[ERROR]`
//! line with exit status 0. Basic-mode (kind 0) DIDs are created and spend
//! only when the key passwords are on the command line.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rand::Rng;
use rubix_harness::config::ReadinessConfig;
use rubix_harness::{HarnessConfig, LaunchMode, Platform};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Minimum port for random test allocation.
pub const TEST_PORT_RANGE_MIN: u16 = 20_000;

/// Maximum port for random test allocation.
pub const TEST_PORT_RANGE_MAX: u16 = 50_000;

/// Distance between the HTTP and gRPC base ports.
const RPC_PORT_GAP: u16 = 5_000;

/// Attempts at finding a free block of ports.
const PORT_ATTEMPTS: usize = 20;

/// Integer balance units per RBT.
pub const UNITS_PER_RBT: u64 = 100_000_000;

const FAKE_NODE_SCRIPT: &str = r#"#!/bin/sh
mkdir -p state
cmd="$1"
[ $# -gt 0 ] && shift

port=""; did=""; tokens=""; sender=""; receiver=""; amount=""; list=""
didtype=""; privpwd=""; quorumpwd=""
while [ $# -gt 0 ]; do
    case "$1" in
        -port) port="$2"; shift 2 ;;
        -did) did="$2"; shift 2 ;;
        -numTokens) tokens="$2"; shift 2 ;;
        -senderAddr) sender="${2##*.}"; shift 2 ;;
        -receiverAddr) receiver="${2##*.}"; shift 2 ;;
        -rbtAmount) amount="$2"; shift 2 ;;
        -quorumList) list="$2"; shift 2 ;;
        -didType) didtype="$2"; shift 2 ;;
        -privPWD) privpwd="$2"; shift 2 ;;
        -quorumPWD) quorumpwd="$2"; shift 2 ;;
        *) shift ;;
    esac
done

units() {
    echo "$1" | awk -F. '{ f = $2; while (length(f) < 8) f = f "0"; printf "%.0f\n", $1 * 100000000 + f }'
}

balance() {
    cat "state/$1" 2>/dev/null || echo 0
}

case "$cmd" in
    run)
        ;;
    get-peer-id)
        echo "12D3KooWFake$port"
        ;;
    createdid)
        if [ "$didtype" = "0" ] && { [ -z "$privpwd" ] || [ -z "$quorumpwd" ]; }; then
            echo "[ERROR] basic mode DID needs -privPWD and -quorumPWD" >&2
            exit 0
        fi
        n=$(cat state/counter 2>/dev/null || echo 0)
        n=$((n + 1))
        echo "$n" > state/counter
        [ "$didtype" = "0" ] && echo 0 > "state/bafybmifake${port}n${n}.kind"
        echo "[INFO] DID bafybmifake${port}n${n} created successfully" >&2
        ;;
    registerdid)
        echo "DID $did registered successfully"
        ;;
    generatetestrbt)
        have=$(balance "$did")
        awk -v h="$have" -v t="$tokens" 'BEGIN { printf "%.0f\n", h + t * 100000000 }' > "state/$did"
        echo "[INFO] Test tokens generated successfully" >&2
        ;;
    addquorum)
        if [ ! -f "$list" ]; then
            echo "[ERROR] quorum list $list not found" >&2
            exit 0
        fi
        echo "[INFO] Quorum list added successfully" >&2
        ;;
    setupquorum)
        echo "[INFO] Quorum setup successfully" >&2
        ;;
    addpeerdetails)
        echo "[INFO] Peer details added successfully" >&2
        ;;
    transferrbt)
        if [ -f "state/$sender.kind" ] && [ -z "$privpwd" ]; then
            echo "[ERROR] basic mode sender needs -privPWD" >&2
            exit 0
        fi
        fraction="${amount#*.}"
        [ "$fraction" = "$amount" ] && fraction=""
        if [ ${#fraction} -gt 8 ]; then
            echo "[ERROR] transfer amount $amount has more than 8 decimal places" >&2
            exit 0
        fi
        need=$(units "$amount")
        have=$(balance "$sender")
        if awk -v h="$have" -v n="$need" 'BEGIN { exit !(h < n) }'; then
            echo "[ERROR] insufficient balance in $sender" >&2
            exit 0
        fi
        awk -v h="$have" -v n="$need" 'BEGIN { printf "%.0f\n", h - n }' > "state/$sender"
        got=$(balance "$receiver")
        awk -v g="$got" -v n="$need" 'BEGIN { printf "%.0f\n", g + n }' > "state/$receiver"
        echo "$sender $receiver $amount" >> state/transfers.log
        echo "[INFO] Transfer finished successfully" >&2
        ;;
    getaccountinfo)
        echo "did: $did rbt: $(balance "$did")"
        ;;
    shutdown)
        echo "$port" >> state/shutdown.log
        echo "[INFO] Shutting down" >&2
        ;;
    *)
        echo "flag provided but not defined: $cmd" >&2
        exit 2
        ;;
esac
"#;

/// Fake node binary plus readiness listeners.
pub struct FakeNetwork {
    temp: TempDir,
    http_base: u16,
    listeners: Vec<JoinHandle<()>>,
}

impl FakeNetwork {
    /// Install the fake binary and answer readiness probes for `slots`.
    pub async fn start(slots: &[u16]) -> Self {
        let temp = TempDir::new().unwrap();
        let binary_dir = temp.path().join(Platform::Linux.build_folder());
        std::fs::create_dir_all(&binary_dir).unwrap();

        let binary = binary_dir.join("rubixgoplatform");
        std::fs::write(&binary, FAKE_NODE_SCRIPT).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        for _ in 0..PORT_ATTEMPTS {
            let http_base = rand::thread_rng().gen_range(TEST_PORT_RANGE_MIN..TEST_PORT_RANGE_MAX);
            if let Some(listeners) = bind_all(http_base, slots).await {
                return Self {
                    temp,
                    http_base,
                    listeners: listeners.into_iter().map(|l| tokio::spawn(serve(l))).collect(),
                };
            }
        }
        panic!("no free port block found after {PORT_ATTEMPTS} attempts");
    }

    /// Root of the fake repository.
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Directory holding the fake binary.
    pub fn binary_dir(&self) -> PathBuf {
        self.root().join(Platform::Linux.build_folder())
    }

    /// Harness configuration pointing at the fake deployment.
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig {
            platform: Some(Platform::Linux),
            repo_root: self.root().to_path_buf(),
            state_dir: self.root().join("snapshots"),
            registry_path: self.root().join("node_registry.json"),
            launch_mode: LaunchMode::Background,
            readiness: ReadinessConfig {
                settle_delay_secs: 0,
                initial_backoff_ms: 20,
                max_backoff_ms: 200,
                timeout_secs: 5,
                host: "127.0.0.1".to_string(),
                ..ReadinessConfig::default()
            },
            ..HarnessConfig::default()
        };
        config.ports.http_base = self.http_base;
        config.ports.rpc_base = self.http_base + RPC_PORT_GAP;
        config
    }

    /// Write the node registry.
    pub fn write_registry(&self, entries: &[(&str, &[u16])]) {
        let registry: BTreeMap<&str, &[u16]> = entries.iter().copied().collect();
        std::fs::write(
            self.root().join("node_registry.json"),
            serde_json::to_string_pretty(&registry).unwrap(),
        )
        .unwrap();
    }

    /// Balance of `did` in units of 10^-8 RBT.
    pub fn balance_units(&self, did: &str) -> u64 {
        std::fs::read_to_string(self.binary_dir().join("state").join(did))
            .map(|s| s.trim().parse().unwrap())
            .unwrap_or(0)
    }

    /// Transfers the fake binary accepted, as `(sender, receiver, amount)`.
    pub fn transfers(&self) -> Vec<(String, String, String)> {
        read_lines(&self.binary_dir().join("state").join("transfers.log"))
            .into_iter()
            .map(|line| {
                let mut parts = line.split_whitespace().map(ToString::to_string);
                (
                    parts.next().unwrap(),
                    parts.next().unwrap(),
                    parts.next().unwrap(),
                )
            })
            .collect()
    }

    /// HTTP ports of nodes that were asked to shut down.
    pub fn shutdown_ports(&self) -> Vec<u16> {
        read_lines(&self.binary_dir().join("state").join("shutdown.log"))
            .iter()
            .map(|line| line.trim().parse().unwrap())
            .collect()
    }
}

impl Drop for FakeNetwork {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(ToString::to_string).collect())
        .unwrap_or_default()
}

async fn bind_all(http_base: u16, slots: &[u16]) -> Option<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(slots.len());
    for slot in slots {
        let port = http_base.checked_add(*slot)?;
        listeners.push(TcpListener::bind(("127.0.0.1", port)).await.ok()?);
    }
    Some(listeners)
}

async fn serve(listener: TcpListener) {
    while let Ok((mut socket, _)) = listener.accept().await {
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]")
                .await;
        });
    }
}
