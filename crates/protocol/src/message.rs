//! The failover message.
//!
//! One message type travels in both directions. Each side holds a single
//! mutable copy, updates the fields it owns, and serializes the whole
//! message end-to-end on every send; a decode replaces the local copy
//! with the peer's latest view. Field ownership follows the protocol:
//! `is_dry_run` and `skip_tower_sync` are written only by the server,
//! the tower bytes and start slot only by the client.

use serde::{Deserialize, Serialize};
use slotswap_types::{unix_millis_now, NodeInfo, VoteCreditSample};

/// Role-tagged timestamps recorded as the protocol advances, Unix epoch
/// milliseconds. Unset until the owning side reaches that phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverTimings {
    pub active_set_identity_start: Option<u64>,
    pub active_set_identity_end: Option<u64>,
    pub passive_set_identity_start: Option<u64>,
    pub passive_set_identity_end: Option<u64>,
    pub active_sync_tower_start: Option<u64>,
    pub active_sync_tower_end: Option<u64>,
    pub passive_sync_tower_end: Option<u64>,
}

/// The single wire object exchanged repeatedly on the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverMessage {
    /// The active node's record; filled by the client on the first send.
    pub active: Option<NodeInfo>,
    /// The passive node's record; filled by the server before the ack.
    pub passive: Option<NodeInfo>,

    /// Phase timestamps.
    pub timings: FailoverTimings,

    /// Slot observed by the client right after the slot boundary it
    /// aligned on.
    pub failover_start_slot: Option<u64>,
    /// Slot observed by the server after its swap, clamped to at least
    /// `failover_start_slot`.
    pub failover_end_slot: Option<u64>,

    /// Server verdict: the client may proceed past the ack.
    pub can_proceed: bool,
    /// Populated instead of `can_proceed`, or to report a late failure.
    pub error_message: String,

    /// Server-authoritative: external commands are logged, not executed.
    pub is_dry_run: bool,
    /// Server-authoritative: no tower transfer this session.
    pub skip_tower_sync: bool,

    /// Terminal success flag; once true the message no longer changes.
    pub is_successfully_completed: bool,
    /// Server asks the client to restore its active identity.
    pub rollback_requested: bool,
    /// Operator-facing reason attached to a rollback request.
    pub rollback_reason: String,
    /// Client confirmation that its rollback ran.
    pub rollback_acknowledged: bool,

    /// Credit samples for the shared active identity, oldest first.
    pub active_vote_credit_samples: Vec<VoteCreditSample>,
}

impl FailoverMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for the peer. Clears `can_proceed`; the invariant
    /// is that a proceed verdict never carries an error message.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
        self.can_proceed = false;
    }

    /// The active node record, or an error message naming the gap.
    pub fn active(&self) -> Result<&NodeInfo, &'static str> {
        self.active.as_ref().ok_or("message carries no active node info")
    }

    /// The passive node record, or an error message naming the gap.
    pub fn passive(&self) -> Result<&NodeInfo, &'static str> {
        self.passive.as_ref().ok_or("message carries no passive node info")
    }

    /// Stamp one of the timing fields with the current time.
    pub fn stamp(field: &mut Option<u64>) {
        *field = Some(unix_millis_now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_error_clears_can_proceed() {
        let mut msg = FailoverMessage::new();
        msg.can_proceed = true;
        msg.record_error("version mismatch");
        assert!(!msg.can_proceed);
        assert_eq!(msg.error_message, "version mismatch");
    }

    #[test]
    fn default_message_is_clean() {
        let msg = FailoverMessage::new();
        assert!(msg.active.is_none());
        assert!(msg.passive.is_none());
        assert!(!msg.can_proceed);
        assert!(!msg.is_successfully_completed);
        assert!(!msg.rollback_requested);
        assert!(msg.error_message.is_empty());
        assert!(msg.active_vote_credit_samples.is_empty());
    }

    #[test]
    fn bincode_round_trip_preserves_every_field() {
        let mut msg = FailoverMessage::new();
        msg.can_proceed = true;
        msg.skip_tower_sync = true;
        msg.failover_start_slot = Some(101);
        msg.failover_end_slot = Some(101);
        msg.timings.active_set_identity_start = Some(1_700_000_000_000);
        msg.active_vote_credit_samples.push(VoteCreditSample {
            epoch_credits: 10,
            total_credits: 4,
            rank: 7,
            timestamp_ms: 1,
        });

        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: FailoverMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_trailing_garbage_lengths() {
        let msg = FailoverMessage::new();
        let mut bytes = bincode::serialize(&msg).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(bincode::deserialize::<FailoverMessage>(&bytes).is_err());
    }
}
