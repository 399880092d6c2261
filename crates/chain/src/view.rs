//! The chain view trait and its result types.

use crate::error::ChainError;
use crate::timing::LeaderTiming;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::net::IpAddr;

/// A cluster gossip entry reduced to what the protocol needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipNode {
    /// Identity pubkey the node currently advertises.
    pub pubkey: String,
    /// Gossip IP address.
    pub ip: IpAddr,
}

/// A vote account with its position in the credit ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRankedAccount {
    /// The vote account address.
    pub vote_pubkey: String,
    /// The node identity the vote account belongs to.
    pub node_pubkey: String,
    /// Credits accumulated in the current epoch.
    pub epoch_credits: u64,
    /// Credits accumulated through the previous epoch.
    pub total_credits: u64,
    /// 1-indexed rank among non-delinquent vote accounts sorted by
    /// descending `epoch_credits - total_credits`.
    pub rank: u64,
}

/// Narrow read-only interface into the chain.
///
/// Every call can be slow or fail transiently; callers own their retry
/// budgets and never assume an error is permanent mid-protocol.
#[async_trait]
pub trait ChainView: Send + Sync {
    /// Latest confirmed absolute slot.
    async fn current_slot(&self) -> Result<u64, ChainError>;

    /// Time from now to the earliest future leader slot owned by `pubkey`
    /// in the current epoch's schedule.
    async fn time_to_next_leader_slot(&self, pubkey: &Pubkey)
        -> Result<LeaderTiming, ChainError>;

    /// Resolve a cluster gossip entry by IP.
    async fn node_from_ip(&self, ip: IpAddr) -> Result<GossipNode, ChainError>;

    /// Resolve a cluster gossip entry by identity pubkey.
    async fn node_from_pubkey(&self, pubkey: &str) -> Result<GossipNode, ChainError>;

    /// Rank non-delinquent vote accounts by descending current-epoch
    /// credit gain and return the entry for `node_pubkey`.
    async fn credit_ranked_vote_account(
        &self,
        node_pubkey: &str,
    ) -> Result<CreditRankedAccount, ChainError>;

    /// Health of the validator behind the local RPC endpoint.
    async fn local_node_health(&self) -> Result<(), ChainError>;

    /// Convenience wrapper: `true` when [`Self::local_node_health`] is Ok.
    async fn is_local_node_healthy(&self) -> bool {
        self.local_node_health().await.is_ok()
    }
}
