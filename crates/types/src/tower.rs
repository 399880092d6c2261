//! Tower-file content hashing.
//!
//! The tower file is the consistency-critical piece of state transferred
//! during a failover; both sides hash it with SHA-256 and compare the hex
//! digests before the passive side commits the bytes to disk.

use std::path::PathBuf;
use thiserror::Error;

use sha2::{Digest, Sha256};

/// Errors raised while reading a tower file.
#[derive(Debug, Error)]
pub enum TowerError {
    #[error("failed to read tower file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Hex-encoded SHA-256 of the tower file contents.
pub fn tower_file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex_encoded() {
        let hash = tower_file_hash(b"tower contents");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, tower_file_hash(b"tower contents"));
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_of_empty_input_matches_known_digest() {
        // SHA-256 of the empty string.
        assert_eq!(
            tower_file_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn different_contents_hash_differently() {
        assert_ne!(tower_file_hash(&[0xAA; 64]), tower_file_hash(&[0xAB; 64]));
    }
}
