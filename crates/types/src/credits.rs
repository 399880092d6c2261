//! Vote-credit samples.
//!
//! The passive side records a baseline sample before the swap and a series
//! of samples afterwards; comparing first and last rank shows whether the
//! failover cost the validator credit standing.

use serde::{Deserialize, Serialize};

/// One observation of the validator's vote-credit standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCreditSample {
    /// Credits accumulated in the current epoch.
    pub epoch_credits: u64,
    /// Credits accumulated through the previous epoch.
    pub total_credits: u64,
    /// 1-indexed position among non-delinquent vote accounts ranked by
    /// descending `epoch_credits - total_credits`.
    pub rank: u64,
    /// Capture time, Unix epoch milliseconds.
    pub timestamp_ms: u64,
}

impl VoteCreditSample {
    /// Rank movement between the first and last of an ordered series.
    ///
    /// Positive means the validator climbed the ranking (first − last).
    /// Returns `None` with fewer than two samples.
    pub fn rank_delta(samples: &[VoteCreditSample]) -> Option<(i64, u64, u64)> {
        let first = samples.first()?;
        let last = samples.last()?;
        if samples.len() < 2 {
            return None;
        }
        Some((
            first.rank as i64 - last.rank as i64,
            first.rank,
            last.rank,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rank: u64) -> VoteCreditSample {
        VoteCreditSample {
            epoch_credits: 1_000,
            total_credits: 900,
            rank,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn rank_delta_positive_when_climbing() {
        let samples = vec![sample(120), sample(118), sample(110)];
        assert_eq!(VoteCreditSample::rank_delta(&samples), Some((10, 120, 110)));
    }

    #[test]
    fn rank_delta_negative_when_falling() {
        let samples = vec![sample(5), sample(9)];
        assert_eq!(VoteCreditSample::rank_delta(&samples), Some((-4, 5, 9)));
    }

    #[test]
    fn rank_delta_requires_two_samples() {
        assert_eq!(VoteCreditSample::rank_delta(&[]), None);
        assert_eq!(VoteCreditSample::rank_delta(&[sample(1)]), None);
    }
}
