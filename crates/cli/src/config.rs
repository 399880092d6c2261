//! Configuration file loading.
//!
//! Everything the coordinator needs comes from one TOML file plus a few
//! CLI overrides. Example:
//!
//! ```toml
//! [node]
//! hostname = "val-fra-1"
//! public_ip = "203.0.113.10"
//! client_version = "2.1.13"
//! tower_file = "/mnt/ledger/tower-1_9-FRA...bin"
//! set_identity_cmd = "agave-validator -l /mnt/ledger set-identity --require-tower /home/sol/keys/active.json"
//!
//! [node.identities.active]
//! pubkey = "FRA1..."
//! keypair_file = "/home/sol/keys/active.json"
//!
//! [node.identities.passive]
//! pubkey = "FRA2..."
//! keypair_file = "/home/sol/keys/passive.json"
//!
//! [rpc]
//! local_url = "http://127.0.0.1:8899"
//! network_url = "https://api.mainnet-beta.solana.com"
//!
//! [failover]
//! peer_address = "val-ams-1.example.net:9898"
//! min_time_to_leader_slot_secs = 30
//! rollback_enabled = true
//! rollback_when_passive = "systemctl restart standby-identity"
//!
//! [[hooks.pre.when_passive]]
//! name = "check-disk"
//! command = "/usr/local/bin/check-disk.sh"
//! must_succeed = true
//! ```

use serde::Deserialize;
use slotswap_protocol::HookSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This node's identity record inputs.
    pub node: NodeConfig,

    /// RPC endpoints.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Failover protocol tuning.
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Post-failover credit monitoring.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Operator hooks.
    #[serde(default)]
    pub hooks: HookSet,
}

/// This node's identity record inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Hostname used in operator-facing output and recovery instructions.
    pub hostname: String,

    /// Public IP advertised in cluster gossip.
    pub public_ip: IpAddr,

    /// Version of the validator binary on this host.
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// Path to the local tower file.
    pub tower_file: PathBuf,

    /// Whitespace-separated command that swaps this node's identity into
    /// the role it is transitioning to.
    pub set_identity_cmd: String,

    /// The two identities this node switches between.
    pub identities: IdentitiesConfig,
}

fn default_client_version() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitiesConfig {
    pub active: IdentityConfig,
    pub passive: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub pubkey: String,
    pub keypair_file: PathBuf,
}

/// RPC endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// The validator on this host.
    #[serde(default = "default_local_rpc_url")]
    pub local_url: String,

    /// Cluster-level queries (gossip, vote accounts, leader schedule).
    #[serde(default = "default_network_rpc_url")]
    pub network_url: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            local_url: default_local_rpc_url(),
            network_url: default_network_rpc_url(),
        }
    }
}

fn default_local_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

fn default_network_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

/// Failover protocol tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// Where the passive node's server listens, `host:port`. Required on
    /// the active side.
    #[serde(default)]
    pub peer_address: Option<String>,

    /// Peer display name; defaults to the host part of `peer_address`.
    #[serde(default)]
    pub peer_name: Option<String>,

    /// Server listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport keep-alive cadence.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Transport idle timeout.
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,

    /// Do not swap while the next leader slot is closer than this.
    #[serde(default = "default_min_time_to_leader_slot_secs")]
    pub min_time_to_leader_slot_secs: u64,

    /// Whether the leader-slot timing gate is enforced.
    #[serde(default = "default_wait_for_leader_slot")]
    pub wait_for_leader_slot: bool,

    /// Skip the tower transfer (server-authoritative).
    #[serde(default)]
    pub skip_tower_sync: bool,

    /// Participate in symmetric rollback. Must match the peer.
    #[serde(default)]
    pub rollback_enabled: bool,

    /// Whitespace-separated rollback command, run on the passive side
    /// when its identity swap fails and rollback is enabled.
    #[serde(default)]
    pub rollback_when_passive: String,

    /// Log external commands instead of executing them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            peer_address: None,
            peer_name: None,
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            min_time_to_leader_slot_secs: default_min_time_to_leader_slot_secs(),
            wait_for_leader_slot: default_wait_for_leader_slot(),
            skip_tower_sync: false,
            rollback_enabled: false,
            rollback_when_passive: String::new(),
            dry_run: false,
        }
    }
}

fn default_port() -> u16 {
    9898
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_stream_timeout_ms() -> u64 {
    600_000
}

fn default_min_time_to_leader_slot_secs() -> u64 {
    30
}

fn default_wait_for_leader_slot() -> bool {
    true
}

/// Post-failover credit monitoring.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub credit_samples: CreditSamplesToml,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditSamplesToml {
    #[serde(default = "default_credit_sample_count")]
    pub count: usize,

    #[serde(default = "default_credit_sample_interval_ms")]
    pub interval_ms: u64,
}

impl Default for CreditSamplesToml {
    fn default() -> Self {
        Self {
            count: default_credit_sample_count(),
            interval_ms: default_credit_sample_interval_ms(),
        }
    }
}

fn default_credit_sample_count() -> usize {
    3
}

fn default_credit_sample_interval_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Split a whitespace-separated command string into argv.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [node]
        hostname = "val-1"
        public_ip = "203.0.113.10"
        tower_file = "/mnt/ledger/tower.bin"
        set_identity_cmd = "agave-validator -l /mnt/ledger set-identity /keys/active.json"

        [node.identities.active]
        pubkey = "ActivePubkey"
        keypair_file = "/keys/active.json"

        [node.identities.passive]
        pubkey = "PassivePubkey"
        keypair_file = "/keys/passive.json"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.failover.port, 9898);
        assert_eq!(config.failover.heartbeat_interval_ms, 5_000);
        assert_eq!(config.failover.stream_timeout_ms, 600_000);
        assert_eq!(config.failover.min_time_to_leader_slot_secs, 30);
        assert!(config.failover.wait_for_leader_slot);
        assert!(!config.failover.rollback_enabled);
        assert!(!config.failover.dry_run);
        assert_eq!(config.rpc.local_url, "http://127.0.0.1:8899");
        assert_eq!(config.monitor.credit_samples.count, 3);
        assert!(config.hooks.pre.when_active.is_empty());
    }

    #[test]
    fn hooks_deserialize_from_toml_tables() {
        let toml_str = format!(
            "{MINIMAL}\n\
             [[hooks.pre.when_passive]]\n\
             name = \"check\"\n\
             command = \"/bin/check\"\n\
             args = [\"--fast\"]\n\
             must_succeed = true\n"
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        let hook = &config.hooks.pre.when_passive[0];
        assert_eq!(hook.name, "check");
        assert_eq!(hook.args, vec!["--fast"]);
        assert!(hook.must_succeed);
    }

    #[test]
    fn split_command_tokenizes_on_whitespace() {
        assert_eq!(
            split_command("agave-validator  -l /mnt/ledger set-identity"),
            vec!["agave-validator", "-l", "/mnt/ledger", "set-identity"]
        );
        assert!(split_command("  ").is_empty());
    }
}
