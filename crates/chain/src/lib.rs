//! Read-only chain view consumed by the failover protocol.
//!
//! The protocol never talks to RPC endpoints directly; it goes through the
//! [`ChainView`] trait, which keeps the surface narrow (current slot,
//! leader timing, gossip lookups, vote-account ranking, local health) and
//! lets tests substitute a scripted implementation. All operations are
//! treated as slow and failure-prone; retry budgets live with the callers.

mod error;
mod solana;
mod timing;
mod view;

pub use error::ChainError;
pub use solana::{SolanaChainView, SolanaChainViewConfig};
pub use timing::{next_leader_slot, LeaderTiming, SLOT_DURATION};
pub use view::{ChainView, CreditRankedAccount, GossipNode};
