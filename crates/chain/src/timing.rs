//! Leader-schedule timing.
//!
//! The leader schedule maps slot indexes (relative to the first slot of
//! the epoch) to pubkeys. Converting a slot distance into wall time uses a
//! fixed 400 ms slot duration; the schedule itself never changes within an
//! epoch, so the math here is pure and the RPC plumbing stays in the view
//! implementation.

use std::time::Duration;

/// Nominal duration of one slot.
pub const SLOT_DURATION: Duration = Duration::from_millis(400);

/// Where the next leader slot for a pubkey sits relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderTiming {
    /// The pubkey has no remaining leader slots this epoch (or is absent
    /// from the schedule entirely).
    NotScheduled,
    /// The pubkey leads `slot`, `time_to_slot` from now.
    Upcoming {
        /// Absolute slot number of the next leader slot.
        slot: u64,
        /// Estimated time until that slot starts.
        time_to_slot: Duration,
    },
}

impl LeaderTiming {
    /// Whether the pubkey has an upcoming leader slot.
    pub fn is_on_schedule(&self) -> bool {
        matches!(self, LeaderTiming::Upcoming { .. })
    }

    /// The estimated time to the next leader slot, zero when not scheduled.
    pub fn time_to_slot(&self) -> Duration {
        match self {
            LeaderTiming::NotScheduled => Duration::ZERO,
            LeaderTiming::Upcoming { time_to_slot, .. } => *time_to_slot,
        }
    }
}

/// Pick the earliest leader slot at or after `current_slot`.
///
/// `schedule_indexes` are slot indexes relative to `first_slot_of_epoch`,
/// as returned by the leader-schedule RPC. Returns `NotScheduled` when no
/// future slot remains this epoch.
pub fn next_leader_slot(
    schedule_indexes: &[usize],
    first_slot_of_epoch: u64,
    current_slot: u64,
) -> LeaderTiming {
    let next = schedule_indexes
        .iter()
        .map(|&index| first_slot_of_epoch + index as u64)
        .filter(|&slot| slot >= current_slot)
        .min();

    match next {
        None => LeaderTiming::NotScheduled,
        Some(slot) => LeaderTiming::Upcoming {
            slot,
            time_to_slot: SLOT_DURATION * (slot - current_slot) as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_earliest_future_slot() {
        // current slot 1000, leader at relative index 10 with epoch start
        // 1000 => absolute 1010, four seconds away.
        let timing = next_leader_slot(&[10, 50], 1000, 1000);
        assert_eq!(
            timing,
            LeaderTiming::Upcoming {
                slot: 1010,
                time_to_slot: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn a_slot_happening_now_counts_as_upcoming() {
        let timing = next_leader_slot(&[0], 500, 500);
        assert_eq!(
            timing,
            LeaderTiming::Upcoming {
                slot: 500,
                time_to_slot: Duration::ZERO,
            }
        );
    }

    #[test]
    fn all_slots_in_the_past_means_not_scheduled() {
        let timing = next_leader_slot(&[1, 2, 3], 1000, 2000);
        assert_eq!(timing, LeaderTiming::NotScheduled);
        assert!(!timing.is_on_schedule());
        assert_eq!(timing.time_to_slot(), Duration::ZERO);
    }

    #[test]
    fn empty_schedule_means_not_scheduled() {
        assert_eq!(next_leader_slot(&[], 0, 0), LeaderTiming::NotScheduled);
    }

    #[test]
    fn unsorted_schedule_indexes_are_handled() {
        let timing = next_leader_slot(&[500, 20, 300], 100, 150);
        assert_eq!(
            timing,
            LeaderTiming::Upcoming {
                slot: 400,
                time_to_slot: SLOT_DURATION * 250,
            }
        );
    }
}
