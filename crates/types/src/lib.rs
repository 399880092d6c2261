//! Shared data types for the slotswap failover coordinator.
//!
//! These types are pure data: node identity records exchanged between the
//! two coordinators, vote-credit samples, and the tower-file content hash.
//! Everything here is serializable because most of it travels on the wire
//! inside the failover message.

mod credits;
mod node;
mod tower;

pub use credits::VoteCreditSample;
pub use node::{Identity, IdentitySet, NodeInfo, NodeInfoError, NodeRole};
pub use tower::{tower_file_hash, TowerError};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix epoch milliseconds.
///
/// Used for the role-tagged protocol timestamps and credit samples; the
/// wire format carries plain `u64` millis so both sides agree on encoding.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
