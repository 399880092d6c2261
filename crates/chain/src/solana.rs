//! Solana RPC implementation of the chain view.
//!
//! Holds two RPC clients: the local one (the validator on this host, used
//! for health) and a network one (used for slots, schedules, gossip and
//! vote accounts so the view stays accurate while the local validator is
//! mid-swap). All chain queries run at `confirmed` commitment.

use crate::error::ChainError;
use crate::timing::{next_leader_slot, LeaderTiming};
use crate::view::{ChainView, CreditRankedAccount, GossipNode};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_response::RpcVoteAccountInfo;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::net::IpAddr;
use tracing::debug;

/// RPC endpoints for [`SolanaChainView`].
#[derive(Debug, Clone)]
pub struct SolanaChainViewConfig {
    /// RPC URL of the validator on this host.
    pub local_rpc_url: String,
    /// RPC URL used for cluster-level queries.
    pub network_rpc_url: String,
}

/// [`ChainView`] backed by Solana JSON-RPC.
pub struct SolanaChainView {
    local: RpcClient,
    network: RpcClient,
}

impl SolanaChainView {
    pub fn new(config: SolanaChainViewConfig) -> Self {
        Self {
            local: RpcClient::new(config.local_rpc_url),
            network: RpcClient::new(config.network_rpc_url),
        }
    }

    async fn cluster_nodes(&self) -> Result<Vec<(String, Option<IpAddr>)>, ChainError> {
        let nodes = self
            .network
            .get_cluster_nodes()
            .await
            .map_err(ChainError::rpc)?;
        Ok(nodes
            .into_iter()
            .map(|n| (n.pubkey, n.gossip.map(|addr| addr.ip())))
            .collect())
    }
}

#[async_trait]
impl ChainView for SolanaChainView {
    async fn current_slot(&self) -> Result<u64, ChainError> {
        self.network
            .get_slot_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(ChainError::rpc)
    }

    async fn time_to_next_leader_slot(
        &self,
        pubkey: &Pubkey,
    ) -> Result<LeaderTiming, ChainError> {
        let epoch_info = self
            .network
            .get_epoch_info_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(ChainError::rpc)?;

        let schedule = self
            .network
            .get_leader_schedule(None)
            .await
            .map_err(ChainError::rpc)?
            .unwrap_or_default();

        let Some(indexes) = schedule.get(&pubkey.to_string()) else {
            debug!(%pubkey, "pubkey not in leader schedule");
            return Ok(LeaderTiming::NotScheduled);
        };

        // Schedule indexes are relative to the first slot of the epoch.
        let first_slot_of_epoch = epoch_info.absolute_slot - epoch_info.slot_index;
        let timing = next_leader_slot(indexes, first_slot_of_epoch, epoch_info.absolute_slot);
        debug!(
            %pubkey,
            current_slot = epoch_info.absolute_slot,
            on_schedule = timing.is_on_schedule(),
            "computed time to next leader slot"
        );
        Ok(timing)
    }

    async fn node_from_ip(&self, ip: IpAddr) -> Result<GossipNode, ChainError> {
        self.cluster_nodes()
            .await?
            .into_iter()
            .find(|(_, gossip_ip)| *gossip_ip == Some(ip))
            .map(|(pubkey, _)| GossipNode { pubkey, ip })
            .ok_or(ChainError::NodeNotFound(ip))
    }

    async fn node_from_pubkey(&self, pubkey: &str) -> Result<GossipNode, ChainError> {
        self.cluster_nodes()
            .await?
            .into_iter()
            .find_map(|(node_pubkey, gossip_ip)| match gossip_ip {
                Some(ip) if node_pubkey == pubkey => Some(GossipNode {
                    pubkey: node_pubkey,
                    ip,
                }),
                _ => None,
            })
            .ok_or_else(|| ChainError::NodeNotFoundByPubkey(pubkey.to_string()))
    }

    async fn credit_ranked_vote_account(
        &self,
        node_pubkey: &str,
    ) -> Result<CreditRankedAccount, ChainError> {
        let vote_accounts = self
            .network
            .get_vote_accounts_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(ChainError::rpc)?;

        let entries = vote_accounts
            .current
            .iter()
            .map(credit_entry)
            .collect::<Vec<_>>();
        rank_credit_entries(entries, node_pubkey)
    }

    async fn local_node_health(&self) -> Result<(), ChainError> {
        self.local
            .get_health()
            .await
            .map_err(|err| ChainError::Unhealthy(err.to_string()))
    }
}

/// Credit standing extracted from one current vote account.
#[derive(Debug, Clone)]
struct CreditEntry {
    vote_pubkey: String,
    node_pubkey: String,
    epoch_credits: u64,
    total_credits: u64,
}

impl CreditEntry {
    /// Credits gained this epoch, the ranking key.
    fn gain(&self) -> i128 {
        self.epoch_credits as i128 - self.total_credits as i128
    }
}

fn credit_entry(account: &RpcVoteAccountInfo) -> CreditEntry {
    // Each epoch_credits entry is (epoch, credits, previous credits); the
    // last entry describes the current epoch.
    let (epoch_credits, total_credits) = account
        .epoch_credits
        .last()
        .map(|&(_, credits, previous)| (credits, previous))
        .unwrap_or((0, 0));
    CreditEntry {
        vote_pubkey: account.vote_pubkey.clone(),
        node_pubkey: account.node_pubkey.clone(),
        epoch_credits,
        total_credits,
    }
}

/// Sort entries by descending credit gain and locate `node_pubkey`.
fn rank_credit_entries(
    mut entries: Vec<CreditEntry>,
    node_pubkey: &str,
) -> Result<CreditRankedAccount, ChainError> {
    entries.sort_by(|a, b| b.gain().cmp(&a.gain()));

    entries
        .iter()
        .position(|entry| entry.node_pubkey == node_pubkey)
        .map(|index| {
            let entry = &entries[index];
            CreditRankedAccount {
                vote_pubkey: entry.vote_pubkey.clone(),
                node_pubkey: entry.node_pubkey.clone(),
                epoch_credits: entry.epoch_credits,
                total_credits: entry.total_credits,
                rank: index as u64 + 1,
            }
        })
        .ok_or_else(|| ChainError::VoteAccountNotFound(node_pubkey.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node: &str, epoch_credits: u64, total_credits: u64) -> CreditEntry {
        CreditEntry {
            vote_pubkey: format!("vote-{node}"),
            node_pubkey: node.to_string(),
            epoch_credits,
            total_credits,
        }
    }

    #[test]
    fn ranks_by_descending_epoch_gain() {
        let entries = vec![
            entry("low", 1_000, 990),   // gain 10
            entry("high", 5_000, 4_000), // gain 1000
            entry("mid", 2_000, 1_900), // gain 100
        ];

        let ranked = rank_credit_entries(entries.clone(), "high").unwrap();
        assert_eq!(ranked.rank, 1);

        let ranked = rank_credit_entries(entries.clone(), "mid").unwrap();
        assert_eq!(ranked.rank, 2);

        let ranked = rank_credit_entries(entries, "low").unwrap();
        assert_eq!(ranked.rank, 3);
        assert_eq!(ranked.epoch_credits, 1_000);
        assert_eq!(ranked.total_credits, 990);
    }

    #[test]
    fn unknown_node_pubkey_is_an_error() {
        let entries = vec![entry("a", 10, 0)];
        assert!(matches!(
            rank_credit_entries(entries, "missing"),
            Err(ChainError::VoteAccountNotFound(_))
        ));
    }

    #[test]
    fn rank_is_one_indexed_for_a_single_account() {
        let entries = vec![entry("only", 42, 0)];
        assert_eq!(rank_credit_entries(entries, "only").unwrap().rank, 1);
    }
}
