//! Chain view errors.

use std::net::IpAddr;
use thiserror::Error;

/// Errors surfaced by [`crate::ChainView`] operations.
///
/// RPC failures are transient from the protocol's point of view; only the
/// not-found variants are verdicts about cluster state.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The underlying RPC request failed. Callers retry under their own
    /// budget.
    #[error("rpc request failed: {0}")]
    Rpc(String),

    /// No gossip entry advertises the given IP.
    #[error("no gossip node found for ip {0}")]
    NodeNotFound(IpAddr),

    /// No gossip entry carries the given pubkey.
    #[error("no gossip node found for pubkey {0}")]
    NodeNotFoundByPubkey(String),

    /// The pubkey has no current (non-delinquent) vote account.
    #[error("no vote account found for node pubkey {0}")]
    VoteAccountNotFound(String),

    /// The local validator reported itself unhealthy.
    #[error("local node unhealthy: {0}")]
    Unhealthy(String),
}

impl ChainError {
    pub(crate) fn rpc(err: impl std::fmt::Display) -> Self {
        ChainError::Rpc(err.to_string())
    }
}
