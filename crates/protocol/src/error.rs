//! Protocol-level errors.
//!
//! Anything that happens before the server sends `can_proceed=true` is
//! reported to the client inside the message; afterwards the outcome
//! channel (`is_successfully_completed` / `rollback_requested`) is used.
//! The variants here are what the role drivers return locally; the binary
//! maps any of them to a non-zero exit.

use crate::command::CommandError;
use crate::hooks::HookError;
use crate::transport::TransportError;
use crate::wire::CodecError;
use slotswap_chain::ChainError;
use thiserror::Error;

/// Fatal outcomes of a failover session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Version or rollback-flag disagreement between the two sides.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Gossip lookup did not resolve the peer, or resolved to a
    /// different IP than claimed.
    #[error("peer identity mismatch: {0}")]
    PeerIdentityMismatch(String),

    /// The operator declined the confirmation prompt.
    #[error("failover cancelled by operator")]
    OperatorCancelled,

    /// A must-succeed pre-hook failed.
    #[error("pre-failover hook failed: {0}")]
    PreHookFailure(#[source] HookError),

    /// Tower hash verification failed after transfer.
    #[error("tower file integrity failure: received hash {received}, expected {expected}")]
    TowerIntegrity { received: String, expected: String },

    /// The external set-identity command exited non-zero.
    #[error("identity swap failed: {0}")]
    IdentitySwap(#[source] CommandError),

    /// A chain-view retry budget was exhausted.
    #[error("chain view unavailable: {0}")]
    ChainUnavailable(#[source] ChainError),

    /// Transport or codec failure after the session was established.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode/decode failure on the stream.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The peer reported a failure through the message.
    #[error("peer reported failure: {0}")]
    PeerReportedFailure(String),

    /// The final decode carried neither success nor a rollback request.
    #[error("peer reported neither success nor rollback")]
    UnexpectedOutcome,

    /// Local filesystem failure around the tower file.
    #[error("tower file i/o failed: {0}")]
    TowerIo(#[source] std::io::Error),

    /// The session was cancelled.
    #[error("session cancelled")]
    Cancelled,
}
