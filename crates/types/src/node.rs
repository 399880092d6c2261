//! Node identity records.
//!
//! Each side of a failover describes itself with a [`NodeInfo`]: hostnames,
//! public IPs, the active/passive identity keypair paths, the tower file
//! location, and the command that swaps the local validator's identity.
//! The record is built from configuration at process start and stays
//! immutable on its owning side; the copy received from the peer is
//! refreshed on every decode.

use crate::tower::{tower_file_hash, TowerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// The role a node plays during a failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Currently signing and voting; runs the client side of the protocol.
    Active,
    /// Standby; runs the server side of the protocol.
    Passive,
}

impl NodeRole {
    /// The role the peer holds when this node holds `self`.
    pub fn peer(self) -> Self {
        match self {
            NodeRole::Active => NodeRole::Passive,
            NodeRole::Passive => NodeRole::Active,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Active => write!(f, "active"),
            NodeRole::Passive => write!(f, "passive"),
        }
    }
}

/// One validator identity: its public key and the on-disk keypair path.
///
/// The keypair file is only ever handed to the external set-identity
/// command; the key material itself is never read and never sent on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Base58 public key.
    pub pubkey: String,
    /// Path to the keypair file on the owning host.
    pub keypair_file: PathBuf,
}

/// The pair of identities a node can assume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySet {
    /// The voting identity.
    pub active: Identity,
    /// The standby identity.
    pub passive: Identity,
}

/// Errors raised by [`NodeInfo`] validation.
#[derive(Debug, Error)]
pub enum NodeInfoError {
    #[error("set_identity_cmd must not be empty")]
    EmptySetIdentityCommand,

    #[error("tower file hash {actual} does not match advertised hash {advertised}")]
    TowerHashMismatch { advertised: String, actual: String },
}

/// Per-side bundle describing one validator in a failover pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Hostname, used for operator-facing output and recovery instructions.
    pub hostname: String,
    /// Public IP advertised in cluster gossip.
    pub public_ip: IpAddr,
    /// Version string of the validator binary running on this host.
    pub client_version: String,
    /// Version of this coordinator; both sides must match exactly.
    pub app_version: String,
    /// Local RPC address, exposed to hooks.
    pub rpc_address: String,
    /// Path to the tower file on this host.
    pub tower_file: PathBuf,
    /// Tower file contents; populated on the active side immediately
    /// before transfer, empty otherwise.
    pub tower_file_bytes: Vec<u8>,
    /// Hex SHA-256 of `tower_file_bytes`, captured in the same read.
    pub tower_file_hash: String,
    /// Argv of the command that swaps this node's identity into the role
    /// it is transitioning to.
    pub set_identity_cmd: Vec<String>,
    /// The identities this node switches between.
    pub identities: IdentitySet,
    /// Whether this side participates in symmetric rollback.
    pub rollback_enabled: bool,
}

impl NodeInfo {
    /// Check the invariants that must hold before the protocol stream runs.
    pub fn validate(&self) -> Result<(), NodeInfoError> {
        if self.set_identity_cmd.is_empty() {
            return Err(NodeInfoError::EmptySetIdentityCommand);
        }
        if !self.tower_file_bytes.is_empty() {
            let actual = tower_file_hash(&self.tower_file_bytes);
            if actual != self.tower_file_hash {
                return Err(NodeInfoError::TowerHashMismatch {
                    advertised: self.tower_file_hash.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Read the tower file, populating `tower_file_bytes` and
    /// `tower_file_hash` from a single read so the two always agree.
    pub fn read_tower_file(&mut self) -> Result<(), TowerError> {
        let bytes = fs::read(&self.tower_file).map_err(|source| TowerError::Read {
            path: self.tower_file.clone(),
            source,
        })?;
        self.tower_file_hash = tower_file_hash(&bytes);
        self.tower_file_bytes = bytes;
        Ok(())
    }

    /// The set-identity argv joined for display.
    pub fn set_identity_cmd_display(&self) -> String {
        self.set_identity_cmd.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_node() -> NodeInfo {
        NodeInfo {
            hostname: "val-1".to_string(),
            public_ip: "203.0.113.10".parse().unwrap(),
            client_version: "2.1.13".to_string(),
            app_version: "0.4.1".to_string(),
            rpc_address: "http://127.0.0.1:8899".to_string(),
            tower_file: PathBuf::from("/tmp/tower.bin"),
            tower_file_bytes: vec![],
            tower_file_hash: String::new(),
            set_identity_cmd: vec!["true".to_string()],
            identities: IdentitySet {
                active: Identity {
                    pubkey: "Act1vePubkey111111111111111111111111111111".to_string(),
                    keypair_file: PathBuf::from("/keys/active.json"),
                },
                passive: Identity {
                    pubkey: "Pass1vePubkey11111111111111111111111111111".to_string(),
                    keypair_file: PathBuf::from("/keys/passive.json"),
                },
            },
            rollback_enabled: false,
        }
    }

    #[test]
    fn validate_rejects_empty_set_identity_cmd() {
        let mut node = test_node();
        node.set_identity_cmd.clear();
        assert!(matches!(
            node.validate(),
            Err(NodeInfoError::EmptySetIdentityCommand)
        ));
    }

    #[test]
    fn validate_checks_tower_hash_consistency() {
        let mut node = test_node();
        node.tower_file_bytes = vec![0xAA; 64];
        node.tower_file_hash = tower_file_hash(&node.tower_file_bytes);
        assert!(node.validate().is_ok());

        node.tower_file_hash = "deadbeef".to_string();
        assert!(matches!(
            node.validate(),
            Err(NodeInfoError::TowerHashMismatch { .. })
        ));
    }

    #[test]
    fn read_tower_file_populates_bytes_and_hash_together() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAA; 64]).unwrap();

        let mut node = test_node();
        node.tower_file = file.path().to_path_buf();
        node.read_tower_file().unwrap();

        assert_eq!(node.tower_file_bytes, vec![0xAA; 64]);
        assert_eq!(node.tower_file_hash, tower_file_hash(&[0xAA; 64]));
        assert!(node.validate().is_ok());
    }

    #[test]
    fn role_peer_is_symmetric() {
        assert_eq!(NodeRole::Active.peer(), NodeRole::Passive);
        assert_eq!(NodeRole::Passive.peer(), NodeRole::Active);
        assert_eq!(NodeRole::Active.peer().peer(), NodeRole::Active);
    }
}
