//! Client role, run by the active node.
//!
//! The client dials the passive node's server (waiting indefinitely for
//! it to come up, so either side can be started first), sends its record,
//! and once acked gates on leader-schedule timing, aligns on a slot
//! boundary, swaps its identity to passive, ships the tower file, and
//! waits for the server's verdict. A server-signalled rollback swaps the
//! identity straight back.

use crate::command::CommandRunner;
use crate::error::ProtocolError;
use crate::hooks::{HookEnv, HookSet};
use crate::message::FailoverMessage;
use crate::session::SessionStream;
use crate::transport::{self, TransportError, TransportSettings};
use slotswap_chain::{ChainView, LeaderTiming};
use slotswap_types::{NodeInfo, NodeRole, TowerError};
use solana_sdk::pubkey::Pubkey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cadence of the server-discovery connect loop.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Cadence of the timing-gate leader-slot query.
const TIMING_GATE_INTERVAL: Duration = Duration::from_secs(2);

/// Transient-error budget for the timing gate, per gate.
const TIMING_GATE_RETRIES: u32 = 10;

/// Cadence of the slot-boundary poll.
const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the client role.
pub struct ClientConfig {
    /// This (active) node's record.
    pub node: NodeInfo,
    /// The local validator's currently-voting identity, used for the
    /// leader-schedule timing gate.
    pub active_identity: Pubkey,
    /// Where the passive node's server listens.
    pub server_address: SocketAddr,
    /// Peer name, used for TLS SNI and operator-facing output.
    pub server_name: String,
    /// QUIC tuning.
    pub transport: TransportSettings,
    /// Operator hooks.
    pub hooks: HookSet,
    /// Do not swap while the next leader slot is closer than this.
    pub min_time_to_leader_slot: Duration,
    /// Whether the timing gate is enforced at all.
    pub wait_for_leader_slot_gate: bool,
}

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutcome {
    /// The failover completed; this node is passive now.
    Completed,
    /// The server failed and both sides rolled back; this node is active
    /// again.
    RolledBack,
}

/// The active-side failover driver.
pub struct FailoverClient {
    config: ClientConfig,
    chain: Arc<dyn ChainView>,
    cancel: CancellationToken,
}

impl FailoverClient {
    pub fn new(config: ClientConfig, chain: Arc<dyn ChainView>) -> Self {
        Self {
            config,
            chain,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that unblocks the connect loop and polling loops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the client half of the protocol to a terminal state.
    pub async fn run(&self) -> Result<ClientOutcome, ProtocolError> {
        let endpoint = transport::client_endpoint(&self.config.transport)?;

        // CONNECT: wait for the server to come up; the passive side may
        // be started later than this one.
        info!(
            server = %self.config.server_name,
            address = %self.config.server_address,
            "waiting for the passive node's server"
        );
        let connection = loop {
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            match transport::connect(
                &endpoint,
                self.config.server_address,
                &self.config.server_name,
            )
            .await
            {
                Ok(connection) => break connection,
                Err(err) => {
                    debug!(error = %err, "server not ready - retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                        _ = sleep(CONNECT_RETRY_INTERVAL) => {}
                    }
                }
            }
        };
        info!(server = %self.config.server_name, "connected");

        // SEND_INIT: discriminator byte, then our record.
        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(TransportError::Connection)?;
        let mut session = SessionStream::new(send, recv);
        session.send_initiate().await?;
        session.message.active = Some(self.config.node.clone());
        session.send().await?;

        // AWAIT_ACK: the server validates, prompts its operator, and
        // clears us to proceed. This wait can be long.
        info!("waiting for failover signal from the server");
        session.recv().await?;

        if !session.message.can_proceed {
            let reason = if session.message.error_message.is_empty() {
                "server declined without a reason".to_string()
            } else {
                session.message.error_message.clone()
            };
            return Err(ProtocolError::PeerReportedFailure(reason));
        }

        // VERSION_CHECK, mirroring the server's own gate.
        let peer = session
            .message
            .passive
            .clone()
            .ok_or_else(|| {
                ProtocolError::PeerReportedFailure("ack carried no passive node info".to_string())
            })?;
        if peer.app_version != self.config.node.app_version {
            return Err(ProtocolError::ConfigMismatch(format!(
                "server is running a different version: {} (them) != {} (us)",
                peer.app_version, self.config.node.app_version
            )));
        }

        // The server decides both of these.
        let is_dry_run = session.message.is_dry_run;
        let skip_tower_sync = session.message.skip_tower_sync;
        let runner = CommandRunner::new(is_dry_run);

        // TIMING_GATE: never swap with a leader slot imminent.
        self.wait_min_time_to_leader_slot().await?;

        // PRE_HOOKS: still active at this point.
        let env = HookEnv::new(&self.config.node, &peer, NodeRole::Active, is_dry_run);
        self.config
            .hooks
            .run_pre(NodeRole::Active, &env)
            .await
            .map_err(ProtocolError::PreHookFailure)?;

        info!("failover started");

        // SLOT_ALIGN: swap right after a slot boundary so the whole
        // exchange lands early in the ~400 ms slot.
        let start_slot = self.wait_for_next_slot().await?;
        session.message.failover_start_slot = Some(start_slot);

        // SWAP: become the passive node.
        info!(
            command = %self.config.node.set_identity_cmd_display(),
            pubkey = %self.config.node.identities.passive.pubkey,
            "setting identity to passive"
        );
        FailoverMessage::stamp(&mut session.message.timings.active_set_identity_start);
        if let Err(err) = runner.run(&self.config.node.set_identity_cmd).await {
            error!(error = %err, "failed to set identity to passive");
            if !skip_tower_sync {
                // Let the server abort instead of waiting out its decode.
                session
                    .message
                    .record_error(format!("active node failed to set identity to passive: {err}"));
                if let Err(send_err) = session.send().await {
                    debug!(error = %send_err, "failed to notify the server of the swap failure");
                }
            }
            return Err(ProtocolError::IdentitySwap(err));
        }
        FailoverMessage::stamp(&mut session.message.timings.active_set_identity_end);

        // SEND_TOWER: read bytes and hash in one motion, then ship them.
        if skip_tower_sync {
            info!("skipping tower file sync");
        } else {
            info!(peer = %peer.hostname, "sending tower file");
            FailoverMessage::stamp(&mut session.message.timings.active_sync_tower_start);

            let mut active_info = self.config.node.clone();
            if let Err(err) = active_info.read_tower_file() {
                error!(error = %err, "failed to read the tower file");
                session
                    .message
                    .record_error(format!("active node failed to read its tower file: {err}"));
                if let Err(send_err) = session.send().await {
                    debug!(error = %send_err, "failed to notify the server of the tower read failure");
                }
                let TowerError::Read { source, .. } = err;
                return Err(ProtocolError::TowerIo(source));
            }
            session.message.active = Some(active_info);
            FailoverMessage::stamp(&mut session.message.timings.active_sync_tower_end);
            session.send().await?;
        }

        // AWAIT_OUTCOME: the server's verdict.
        session.recv().await?;

        if session.message.is_successfully_completed {
            info!("failover complete - this node is passive now");
            let env = HookEnv::new(&self.config.node, &peer, NodeRole::Passive, is_dry_run);
            self.config.hooks.run_post(NodeRole::Passive, &env).await;
            session.finish();
            return Ok(ClientOutcome::Completed);
        }

        if session.message.rollback_requested {
            warn!(
                reason = %session.message.rollback_reason,
                "server requested rollback - restoring the active identity"
            );
            // The swap command is symmetric: running it again swaps the
            // identity files back and this node resumes voting.
            runner
                .run(&self.config.node.set_identity_cmd)
                .await
                .map_err(ProtocolError::IdentitySwap)?;
            session.message.rollback_acknowledged = true;
            session.send().await?;
            info!("rollback complete - this node is active again");
            session.finish();
            return Ok(ClientOutcome::RolledBack);
        }

        if !session.message.error_message.is_empty() {
            return Err(ProtocolError::PeerReportedFailure(
                session.message.error_message.clone(),
            ));
        }
        Err(ProtocolError::UnexpectedOutcome)
    }

    /// Block until the next leader slot is far enough away, or until the
    /// local identity drops off the schedule entirely.
    async fn wait_min_time_to_leader_slot(&self) -> Result<(), ProtocolError> {
        if !self.config.wait_for_leader_slot_gate {
            debug!("leader slot timing gate disabled - skipping");
            return Ok(());
        }

        let min = self.config.min_time_to_leader_slot;
        let mut retries_left = TIMING_GATE_RETRIES;
        info!(min_secs = min.as_secs(), "checking the next leader slot");

        loop {
            match self
                .chain
                .time_to_next_leader_slot(&self.config.active_identity)
                .await
            {
                Ok(LeaderTiming::NotScheduled) => {
                    info!("not on the leader schedule - proceeding");
                    return Ok(());
                }
                Ok(LeaderTiming::Upcoming { slot, time_to_slot }) => {
                    if time_to_slot >= min {
                        info!(
                            slot,
                            seconds_away = time_to_slot.as_secs(),
                            "next leader slot is far enough away - proceeding"
                        );
                        return Ok(());
                    }
                    info!(
                        slot,
                        seconds_away = time_to_slot.as_secs(),
                        "next leader slot too close - waiting for it to pass"
                    );
                }
                Err(err) => {
                    if retries_left == 0 {
                        return Err(ProtocolError::ChainUnavailable(err));
                    }
                    retries_left -= 1;
                    warn!(error = %err, retries_left, "failed to get the time to the next leader slot - retrying");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                _ = sleep(TIMING_GATE_INTERVAL) => {}
            }
        }
    }

    /// Poll until the observed slot advances past the one captured at
    /// entry, landing the caller within the first tens of milliseconds of
    /// the new slot.
    async fn wait_for_next_slot(&self) -> Result<u64, ProtocolError> {
        let baseline = self
            .chain
            .current_slot()
            .await
            .map_err(ProtocolError::ChainUnavailable)?;
        debug!(baseline, "waiting for the start of the next slot");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                _ = sleep(SLOT_POLL_INTERVAL) => {}
            }

            match self.chain.current_slot().await {
                Ok(slot) if slot > baseline => {
                    debug!(old_slot = baseline, new_slot = slot, "slot transition detected");
                    return Ok(slot);
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "slot poll failed - retrying"),
            }
        }
    }
}
