//! Server role, run by the passive node.
//!
//! The server accepts one failover session, validates the peer, prompts
//! the local operator, receives the tower file, swaps its identity to
//! active, and confirms the swap through the gossip view. A swap failure
//! triggers the symmetric rollback exchange when both sides enabled it.
//!
//! Everything that goes wrong before the `can_proceed` ack is reported to
//! the client inside the message; after the ack the outcome flags carry
//! the verdict.

use crate::command::CommandRunner;
use crate::error::ProtocolError;
use crate::hooks::{HookEnv, HookSet};
use crate::message::FailoverMessage;
use crate::monitor::{self, CreditSamplesConfig};
use crate::session::SessionStream;
use crate::transport::{self, TransportError, TransportSettings};
use crate::wire::{CodecError, MessageType};
use async_trait::async_trait;
use quinn::Connection;
use slotswap_chain::ChainView;
use slotswap_types::{tower_file_hash, NodeInfo, NodeRole};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Gossip-confirmation retry budget.
const GOSSIP_CONFIRM_ATTEMPTS: u32 = 5;

/// Operator confirmation seam.
///
/// The protocol only needs a yes/no; how the operator is asked is up to
/// the implementation (stdin here, auto-approval in tests).
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm_failover(&self, peer: &NodeInfo, is_dry_run: bool) -> bool;
}

/// Reads the answer from stdin; accepts `y` or `yes`.
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm_failover(&self, peer: &NodeInfo, is_dry_run: bool) -> bool {
        let marker = if is_dry_run { " (dry run)" } else { "" };
        println!(
            "Failover requested by {} ({}){marker} - this node will become ACTIVE. Proceed? [y/N]",
            peer.hostname, peer.public_ip
        );
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        }
    }
}

/// Configuration for the server role.
pub struct ServerConfig {
    /// This (passive) node's record.
    pub node: NodeInfo,
    /// QUIC tuning; the listen port lives here.
    pub transport: TransportSettings,
    /// Operator hooks.
    pub hooks: HookSet,
    /// Log external commands instead of executing them. Propagated to
    /// the client in the ack; the server is the authority on this flag.
    pub is_dry_run: bool,
    /// Skip the tower transfer and delete any stale local tower file.
    /// Server-authoritative, like `is_dry_run`.
    pub skip_tower_sync: bool,
    /// Rollback command run when the local identity swap fails and
    /// rollback is enabled. May be empty.
    pub rollback_cmd: Vec<String>,
    /// Post-failover credit monitoring.
    pub credit_samples: CreditSamplesConfig,
}

/// The passive-side failover driver.
pub struct FailoverServer {
    config: ServerConfig,
    chain: Arc<dyn ChainView>,
    confirm: Arc<dyn Confirm>,
    runner: CommandRunner,
    cancel: CancellationToken,
}

impl FailoverServer {
    pub fn new(config: ServerConfig, chain: Arc<dyn ChainView>, confirm: Arc<dyn Confirm>) -> Self {
        let runner = CommandRunner::new(config.is_dry_run);
        Self {
            config,
            chain,
            confirm,
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that tears down the session, listener and polling loops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Listen for the active node and drive one failover session to a
    /// terminal state. The listener closes afterwards either way.
    pub async fn run(&self) -> Result<(), ProtocolError> {
        let endpoint = transport::server_endpoint(&self.config.transport)?;
        info!(
            port = endpoint.local_addr().map(|a| a.port()).unwrap_or(0),
            "listening - run this program on the ACTIVE validator to continue"
        );

        let result = loop {
            let incoming = tokio::select! {
                _ = self.cancel.cancelled() => break Err(ProtocolError::Cancelled),
                incoming = endpoint.accept() => incoming,
            };
            let Some(incoming) = incoming else {
                break Err(ProtocolError::Cancelled);
            };

            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            };
            debug!(remote = %connection.remote_address(), "accepted connection");

            break self.handle_connection(&connection).await;
        };

        self.cancel.cancel();
        endpoint.close(0u32.into(), b"failover server closed");
        endpoint.wait_idle().await;
        result
    }

    /// Accept streams until one opens with the failover discriminator,
    /// then drive the session on it. Streams with reserved or unknown
    /// discriminators are ignored.
    async fn handle_connection(&self, connection: &Connection) -> Result<(), ProtocolError> {
        loop {
            let (send, recv) = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                stream = connection.accept_bi() => stream.map_err(TransportError::Connection)?,
            };
            let mut session = SessionStream::new(send, recv);

            match session.read_message_type().await {
                Ok(MessageType::FailoverInitiate) => {
                    debug!("received failover initiate request");
                    return self.run_session(&mut session, connection).await;
                }
                Ok(other) => {
                    warn!(message_type = ?other, "unsupported message type - ignoring stream");
                }
                Err(CodecError::StreamClosed) => {
                    debug!("stream closed by peer before a message type arrived");
                }
                Err(CodecError::UnknownMessageType(byte)) => {
                    warn!(byte, "unknown message type - ignoring stream");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn run_session(
        &self,
        session: &mut SessionStream,
        connection: &Connection,
    ) -> Result<(), ProtocolError> {
        let node = &self.config.node;

        // READ_INIT: the client's record arrives first.
        session.recv().await?;
        session.message.passive = Some(node.clone());
        session.message.is_dry_run = self.config.is_dry_run;
        session.message.skip_tower_sync = self.config.skip_tower_sync;

        let Some(active) = session.message.active.clone() else {
            return Err(self
                .reject(
                    session,
                    "initiate message carried no active node info".to_string(),
                    ProtocolError::PeerReportedFailure(
                        "initiate message carried no active node info".to_string(),
                    ),
                )
                .await);
        };

        // VALIDATE: version, rollback parity, gossip cross-check.
        if active.app_version != node.app_version {
            let reason = format!(
                "server ({}) and client ({}) version mismatch",
                node.app_version, active.app_version
            );
            return Err(self
                .reject(session, reason.clone(), ProtocolError::ConfigMismatch(reason))
                .await);
        }

        if active.rollback_enabled != node.rollback_enabled {
            let reason = format!(
                "rollback must be enabled on both sides or neither (server: {}, client: {})",
                node.rollback_enabled, active.rollback_enabled
            );
            return Err(self
                .reject(session, reason.clone(), ProtocolError::ConfigMismatch(reason))
                .await);
        }

        debug!(ip = %active.public_ip, "querying gossip for the active node");
        match self.chain.node_from_ip(active.public_ip).await {
            Ok(gossip) if gossip.ip == active.public_ip => {}
            Ok(gossip) => {
                let reason = format!(
                    "gossip resolved active node to {} instead of claimed {}",
                    gossip.ip, active.public_ip
                );
                return Err(self
                    .reject(
                        session,
                        reason.clone(),
                        ProtocolError::PeerIdentityMismatch(reason),
                    )
                    .await);
            }
            Err(err) => {
                let reason = format!("failed to validate active node in gossip: {err}");
                return Err(self
                    .reject(
                        session,
                        reason.clone(),
                        ProtocolError::PeerIdentityMismatch(reason),
                    )
                    .await);
            }
        }

        // CONFIRM: the operator has the last word.
        if !self
            .confirm
            .confirm_failover(&active, self.config.is_dry_run)
            .await
        {
            return Err(self
                .reject(
                    session,
                    "server operator declined the failover".to_string(),
                    ProtocolError::OperatorCancelled,
                )
                .await);
        }

        // SAMPLE: baseline credit standing for the shared active identity.
        debug!("pulling pre-failover vote credit sample");
        match monitor::pull_sample(self.chain.as_ref(), &node.identities.active.pubkey).await {
            Ok(sample) => session.message.active_vote_credit_samples.push(sample),
            Err(err) => {
                let reason = format!("server failed to pull a baseline vote credit sample: {err}");
                return Err(self
                    .reject(session, reason, ProtocolError::ChainUnavailable(err))
                    .await);
            }
        }

        // PREPARE_TOWER: open the destination early so the transfer only
        // has to write, or delete a stale file when skipping the sync.
        // A dry run leaves the tower file untouched either way.
        let mut tower_file = None;
        if self.config.skip_tower_sync {
            if node.tower_file.exists() {
                if self.config.is_dry_run {
                    info!(path = %node.tower_file.display(), "dry run - leaving existing tower file in place");
                } else {
                    info!(path = %node.tower_file.display(), "removing existing tower file");
                    if let Err(err) = std::fs::remove_file(&node.tower_file) {
                        let reason = format!(
                            "failed to remove tower file {}: {err}",
                            node.tower_file.display()
                        );
                        return Err(self
                            .reject(session, reason, ProtocolError::TowerIo(err))
                            .await);
                    }
                }
            }
        } else if !self.config.is_dry_run {
            match open_tower_file(node) {
                Ok(file) => tower_file = Some(file),
                Err(err) => {
                    let reason = format!(
                        "server failed to open its tower file {}: {err}",
                        node.tower_file.display()
                    );
                    return Err(self
                        .reject(session, reason, ProtocolError::TowerIo(err))
                        .await);
                }
            }
        }

        // PRE_HOOKS: still passive at this point.
        let env = HookEnv::new(node, &active, NodeRole::Passive, self.config.is_dry_run);
        if let Err(err) = self.config.hooks.run_pre(NodeRole::Passive, &env).await {
            let reason = format!("server failed to run its pre-failover hooks: {err}");
            return Err(self
                .reject(session, reason, ProtocolError::PreHookFailure(err))
                .await);
        }

        // SEND_ACK: clear the client to proceed.
        session.message.can_proceed = true;
        session.send().await?;

        // WAIT_TOWER: receive and verify the tower file.
        if self.config.skip_tower_sync {
            info!("failover started - skipping tower file sync");
        } else {
            info!(peer = %active.hostname, "failover started - waiting for tower file");
            session.recv().await?;

            if !session.message.error_message.is_empty() {
                let reason = session.message.error_message.clone();
                error!(%reason, "client failed to complete its part of the failover");
                connection.close(0u32.into(), b"client failed");
                return Err(ProtocolError::PeerReportedFailure(reason));
            }

            let sent = session
                .message
                .active
                .clone()
                .ok_or_else(|| {
                    ProtocolError::PeerReportedFailure(
                        "tower transfer carried no active node info".to_string(),
                    )
                })?;

            let received = tower_file_hash(&sent.tower_file_bytes);
            debug!(%received, expected = %sent.tower_file_hash, "checking tower file hash");
            if received != sent.tower_file_hash {
                print_manual_recovery(&sent, node);
                return Err(ProtocolError::TowerIntegrity {
                    received,
                    expected: sent.tower_file_hash,
                });
            }

            if self.config.is_dry_run {
                info!(
                    bytes = sent.tower_file_bytes.len(),
                    "dry run - tower file verified but not written"
                );
            } else {
                let mut file = tower_file.take().ok_or_else(|| {
                    ProtocolError::TowerIo(std::io::Error::other("tower file handle missing"))
                })?;
                file.write_all(&sent.tower_file_bytes)
                    .and_then(|_| file.flush())
                    .map_err(ProtocolError::TowerIo)?;
                // Close the handle before the identity swap runs.
                drop(file);
                info!(bytes = sent.tower_file_bytes.len(), "received tower file");
            }

            FailoverMessage::stamp(&mut session.message.timings.passive_sync_tower_end);
        }

        // SWAP: become the active node.
        info!(
            command = %node.set_identity_cmd_display(),
            pubkey = %node.identities.active.pubkey,
            "setting identity to active"
        );
        FailoverMessage::stamp(&mut session.message.timings.passive_set_identity_start);
        if let Err(err) = self.runner.run(&node.set_identity_cmd).await {
            return self.rollback(session, connection, err).await;
        }
        FailoverMessage::stamp(&mut session.message.timings.passive_set_identity_end);

        // RECORD_END: the RPC may lag a slot behind; clamp to the start.
        let start_slot = session.message.failover_start_slot.unwrap_or(0);
        let end_slot = match self.chain.current_slot().await {
            Ok(slot) => slot.max(start_slot),
            Err(err) => {
                warn!(error = %err, "failed to read the failover end slot");
                start_slot
            }
        };
        session.message.failover_end_slot = Some(end_slot);

        // SEND_OK: terminal success; the message no longer changes state.
        session.message.is_successfully_completed = true;
        session.send().await?;
        info!(start_slot, end_slot, "failover complete");

        // POST_HOOKS: this node is active now.
        let env = HookEnv::new(node, &active, NodeRole::Active, self.config.is_dry_run);
        self.config.hooks.run_post(NodeRole::Active, &env).await;

        // CONFIRM_GOSSIP: advisory; a dry run never changed gossip.
        if !self.config.is_dry_run {
            self.confirm_gossip(&active).await;
        }

        // MONITOR: watch the credit rank settle.
        info!("monitoring vote credits post-failover");
        monitor::monitor_credits(
            self.chain.as_ref(),
            &node.identities.active.pubkey,
            &self.config.credit_samples,
            &mut session.message.active_vote_credit_samples,
        )
        .await;

        session.finish();
        connection.close(0u32.into(), b"failover complete");
        Ok(())
    }

    /// Report a pre-ack failure to the client, then fail with `err`.
    async fn reject(
        &self,
        session: &mut SessionStream,
        reason: String,
        err: ProtocolError,
    ) -> ProtocolError {
        error!(%reason, "rejecting failover");
        session.message.record_error(reason);
        if let Err(send_err) = session.send().await {
            error!(error = %send_err, "failed to send error message to client");
        }
        err
    }

    /// Local identity swap failed: roll back locally if enabled, tell the
    /// client, and wait for its acknowledgment before closing.
    async fn rollback(
        &self,
        session: &mut SessionStream,
        connection: &Connection,
        cause: crate::command::CommandError,
    ) -> Result<(), ProtocolError> {
        let node = &self.config.node;
        error!(error = %cause, command = %node.set_identity_cmd_display(), "failed to set identity to active");

        if node.rollback_enabled && !self.config.rollback_cmd.is_empty() {
            warn!("rollback enabled - executing local rollback");
            if let Err(err) = self.runner.run(&self.config.rollback_cmd).await {
                error!(error = %err, "failed to execute rollback command");
            }
        }

        session.message.is_successfully_completed = false;
        session.message.error_message = format!("failover failed: {cause}");
        session.message.rollback_requested = node.rollback_enabled;
        if node.rollback_enabled {
            session.message.rollback_reason =
                format!("passive node failed to set identity to active: {cause}");
            info!("sending failure notification with rollback request - client will become active again");
        } else {
            info!("sending failure notification (rollback disabled)");
        }
        session.send().await?;

        if node.rollback_enabled {
            info!("waiting for client rollback acknowledgment");
            match session.recv().await {
                Ok(()) if session.message.rollback_acknowledged => {
                    info!("client acknowledged rollback");
                }
                Ok(()) => warn!("client replied without acknowledging the rollback"),
                Err(err) => warn!(error = %err, "failed to receive rollback acknowledgment"),
            }
        }

        session.finish();
        connection.close(0u32.into(), b"rollback complete");
        Err(ProtocolError::IdentitySwap(cause))
    }

    /// Verify through gossip that both sides' keys switched, with bounded
    /// retries. Advisory only: the swap commands already succeeded, so an
    /// unconfirmed switch is a loud warning rather than a failure.
    async fn confirm_gossip(&self, active: &NodeInfo) {
        info!("confirming gossip nodes switched roles");

        for attempt in 1..=GOSSIP_CONFIRM_ATTEMPTS {
            match self.check_gossip_swap(active).await {
                Ok(()) => {
                    info!("gossip confirms nodes switched roles");
                    return;
                }
                Err(reason) if attempt < GOSSIP_CONFIRM_ATTEMPTS => {
                    let delay = Duration::from_secs(2u64 << (attempt - 1));
                    warn!(
                        attempt,
                        max_attempts = GOSSIP_CONFIRM_ATTEMPTS,
                        %reason,
                        delay_secs = delay.as_secs(),
                        "gossip does not yet reflect the role switch - retrying"
                    );
                    sleep(delay).await;
                }
                Err(reason) => {
                    error!(
                        attempt,
                        %reason,
                        "gossip does not confirm the role switch - investigate immediately"
                    );
                    return;
                }
            }
        }
    }

    async fn check_gossip_swap(&self, active: &NodeInfo) -> Result<(), String> {
        let node = &self.config.node;

        // Our IP must now advertise the key that was previously passive
        // here (the active identity we just took over).
        let now_active = self
            .chain
            .node_from_ip(node.public_ip)
            .await
            .map_err(|err| format!("failed to refresh this node from gossip: {err}"))?;
        if now_active.pubkey != node.identities.active.pubkey {
            return Err(format!(
                "gossip shows {} for {} instead of {}",
                now_active.pubkey, node.public_ip, node.identities.active.pubkey
            ));
        }

        // The peer's IP must now advertise its passive identity.
        let now_passive = self
            .chain
            .node_from_ip(active.public_ip)
            .await
            .map_err(|err| format!("failed to refresh the peer from gossip: {err}"))?;
        if now_passive.pubkey != active.identities.passive.pubkey {
            return Err(format!(
                "gossip shows {} for {} instead of {}",
                now_passive.pubkey, active.public_ip, active.identities.passive.pubkey
            ));
        }

        Ok(())
    }
}

fn open_tower_file(node: &NodeInfo) -> Result<std::fs::File, std::io::Error> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(&node.tower_file)
}

/// The tower transfer failed verification: tell the operator exactly how
/// to finish the failover by hand.
fn print_manual_recovery(active: &NodeInfo, passive: &NodeInfo) {
    error!("aborting failover - copy the tower file manually, then swap identities:");
    println!(
        "  rsync -avz {}:{} {}",
        active.hostname,
        active.tower_file.display(),
        passive.tower_file.display()
    );
    println!("  {}", passive.set_identity_cmd_display());
}
