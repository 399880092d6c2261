//! Post-failover vote-credit monitoring.
//!
//! After a successful swap the server keeps sampling the shared active
//! identity's credit rank for a while. The samples ride along in the
//! failover message, and the first/last rank movement is logged so the
//! operator can see what the failover cost. Monitoring is advisory: a
//! failed sample is logged and skipped, never fatal.

use slotswap_chain::{ChainError, ChainView};
use slotswap_types::{unix_millis_now, VoteCreditSample};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// How many samples to pull after the failover, and how far apart.
#[derive(Debug, Clone)]
pub struct CreditSamplesConfig {
    pub count: usize,
    pub interval: Duration,
}

impl Default for CreditSamplesConfig {
    fn default() -> Self {
        Self {
            count: 3,
            interval: Duration::from_secs(10),
        }
    }
}

/// Pull one credit sample for `node_pubkey`.
pub async fn pull_sample(
    chain: &dyn ChainView,
    node_pubkey: &str,
) -> Result<VoteCreditSample, ChainError> {
    let ranked = chain.credit_ranked_vote_account(node_pubkey).await?;
    Ok(VoteCreditSample {
        epoch_credits: ranked.epoch_credits,
        total_credits: ranked.total_credits,
        rank: ranked.rank,
        timestamp_ms: unix_millis_now(),
    })
}

/// Pull `config.count` samples at `config.interval`, appending to
/// `samples`, then log the rank movement across the whole series
/// (including any baseline already present).
pub async fn monitor_credits(
    chain: &dyn ChainView,
    node_pubkey: &str,
    config: &CreditSamplesConfig,
    samples: &mut Vec<VoteCreditSample>,
) {
    for i in 0..config.count {
        if i > 0 {
            sleep(config.interval).await;
        }
        match pull_sample(chain, node_pubkey).await {
            Ok(sample) => {
                info!(rank = sample.rank, epoch_credits = sample.epoch_credits, "credit sample");
                samples.push(sample);
            }
            Err(err) => warn!(error = %err, "failed to pull credit sample"),
        }
    }

    match VoteCreditSample::rank_delta(samples) {
        Some((delta, first, last)) => {
            info!(delta, first, last, "vote credit rank change");
        }
        None => warn!("not enough credit samples to report a rank change"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use slotswap_chain::{CreditRankedAccount, GossipNode, LeaderTiming};
    use solana_sdk::pubkey::Pubkey;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Rank improves by one on every query.
    struct ClimbingRank(AtomicU64);

    #[async_trait]
    impl ChainView for ClimbingRank {
        async fn current_slot(&self) -> Result<u64, ChainError> {
            Ok(0)
        }

        async fn time_to_next_leader_slot(
            &self,
            _pubkey: &Pubkey,
        ) -> Result<LeaderTiming, ChainError> {
            Ok(LeaderTiming::NotScheduled)
        }

        async fn node_from_ip(&self, ip: IpAddr) -> Result<GossipNode, ChainError> {
            Err(ChainError::NodeNotFound(ip))
        }

        async fn node_from_pubkey(&self, pubkey: &str) -> Result<GossipNode, ChainError> {
            Err(ChainError::NodeNotFoundByPubkey(pubkey.to_string()))
        }

        async fn credit_ranked_vote_account(
            &self,
            node_pubkey: &str,
        ) -> Result<CreditRankedAccount, ChainError> {
            let rank = self.0.fetch_sub(1, Ordering::SeqCst);
            Ok(CreditRankedAccount {
                vote_pubkey: "vote".to_string(),
                node_pubkey: node_pubkey.to_string(),
                epoch_credits: 100,
                total_credits: 50,
                rank,
            })
        }

        async fn local_node_health(&self) -> Result<(), ChainError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn collects_the_configured_number_of_samples() {
        let chain = ClimbingRank(AtomicU64::new(10));
        let config = CreditSamplesConfig {
            count: 3,
            interval: Duration::from_millis(1),
        };

        let mut samples = vec![pull_sample(&chain, "node").await.unwrap()];
        monitor_credits(&chain, "node", &config, &mut samples).await;

        assert_eq!(samples.len(), 4);
        assert_eq!(samples.first().unwrap().rank, 10);
        assert_eq!(samples.last().unwrap().rank, 7);
        assert_eq!(
            VoteCreditSample::rank_delta(&samples),
            Some((3, 10, 7))
        );
    }
}
