//! slotswap - two-party validator failover coordinator.
//!
//! Run this on both validators of a pair. The passive node serves, the
//! active node connects, and the two swap roles with the tower file
//! carried across cryptographically verified. The role is detected from
//! gossip (which identity our public IP currently advertises) and can be
//! overridden with `--role`.
//!
//! ```bash
//! # on the passive standby (start first or second, order doesn't matter)
//! slotswap --config failover.toml
//!
//! # on the active validator
//! slotswap --config failover.toml
//!
//! # rehearse without touching anything (flag applies on the passive side)
//! slotswap --config failover.toml --dry-run
//! ```

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use config::{split_command, Config};
use slotswap_chain::{ChainView, SolanaChainView, SolanaChainViewConfig};
use slotswap_protocol::{
    ClientConfig, ClientOutcome, CreditSamplesConfig, FailoverClient, FailoverServer,
    ServerConfig, StdinConfirm, TransportSettings,
};
use slotswap_types::{Identity, IdentitySet, NodeInfo, NodeRole};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Two-party validator failover coordinator.
#[derive(Parser, Debug)]
#[command(name = "slotswap")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Force the role instead of detecting it from gossip
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Log external commands instead of executing them (server-authoritative)
    #[arg(long)]
    dry_run: bool,

    /// Skip the tower file transfer (server-authoritative)
    #[arg(long)]
    skip_tower_sync: bool,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Active,
    Passive,
}

fn build_node_info(config: &Config, rollback_enabled: bool) -> NodeInfo {
    NodeInfo {
        hostname: config.node.hostname.clone(),
        public_ip: config.node.public_ip,
        client_version: config.node.client_version.clone(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        rpc_address: config.rpc.local_url.clone(),
        tower_file: config.node.tower_file.clone(),
        tower_file_bytes: vec![],
        tower_file_hash: String::new(),
        set_identity_cmd: split_command(&config.node.set_identity_cmd),
        identities: IdentitySet {
            active: Identity {
                pubkey: config.node.identities.active.pubkey.clone(),
                keypair_file: config.node.identities.active.keypair_file.clone(),
            },
            passive: Identity {
                pubkey: config.node.identities.passive.pubkey.clone(),
                keypair_file: config.node.identities.passive.keypair_file.clone(),
            },
        },
        rollback_enabled,
    }
}

fn transport_settings(config: &Config) -> TransportSettings {
    TransportSettings {
        port: config.failover.port,
        heartbeat_interval: Duration::from_millis(config.failover.heartbeat_interval_ms),
        stream_timeout: Duration::from_millis(config.failover.stream_timeout_ms),
    }
}

/// Decide which side of the protocol to run by asking gossip which
/// identity this host's public IP currently advertises. Falls back to
/// looking the configured identities up by pubkey when the IP lookup
/// comes up empty.
async fn detect_role(chain: &dyn ChainView, node: &NodeInfo) -> Result<NodeRole> {
    match chain.node_from_ip(node.public_ip).await {
        Ok(gossip) => {
            if gossip.pubkey == node.identities.active.pubkey {
                return Ok(NodeRole::Active);
            }
            if gossip.pubkey == node.identities.passive.pubkey {
                return Ok(NodeRole::Passive);
            }
            bail!(
                "gossip advertises {} for {}, which is neither the configured active nor passive identity",
                gossip.pubkey,
                node.public_ip
            );
        }
        Err(err) => {
            warn!(error = %err, "gossip lookup by ip failed - trying by identity pubkey");
        }
    }

    for (identity, role) in [
        (&node.identities.active, NodeRole::Active),
        (&node.identities.passive, NodeRole::Passive),
    ] {
        if let Ok(gossip) = chain.node_from_pubkey(&identity.pubkey).await {
            if gossip.ip == node.public_ip {
                return Ok(role);
            }
        }
    }

    bail!(
        "could not resolve {} in gossip to detect the role; pass --role explicitly",
        node.public_ip
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load(&cli.config)?;
    let is_dry_run = cli.dry_run || config.failover.dry_run;
    let skip_tower_sync = cli.skip_tower_sync || config.failover.skip_tower_sync;

    let node = build_node_info(&config, config.failover.rollback_enabled);
    node.validate().context("invalid node configuration")?;

    let chain: Arc<dyn ChainView> = Arc::new(SolanaChainView::new(SolanaChainViewConfig {
        local_rpc_url: config.rpc.local_url.clone(),
        network_rpc_url: config.rpc.network_url.clone(),
    }));

    let role = match cli.role {
        Some(RoleArg::Active) => NodeRole::Active,
        Some(RoleArg::Passive) => NodeRole::Passive,
        None => detect_role(chain.as_ref(), &node).await?,
    };

    info!(
        %role,
        hostname = %node.hostname,
        dry_run = is_dry_run,
        "starting failover coordinator"
    );

    if !chain.is_local_node_healthy().await {
        warn!("local validator reports unhealthy - continuing, but verify before swapping");
    }

    match role {
        NodeRole::Passive => {
            let server = FailoverServer::new(
                ServerConfig {
                    node,
                    transport: transport_settings(&config),
                    hooks: config.hooks.clone(),
                    is_dry_run,
                    skip_tower_sync,
                    rollback_cmd: split_command(&config.failover.rollback_when_passive),
                    credit_samples: CreditSamplesConfig {
                        count: config.monitor.credit_samples.count,
                        interval: Duration::from_millis(config.monitor.credit_samples.interval_ms),
                    },
                },
                chain,
                Arc::new(StdinConfirm),
            );

            spawn_shutdown_handler(server.cancellation_token());
            server.run().await.context("failover failed")?;
        }
        NodeRole::Active => {
            let peer_address = config
                .failover
                .peer_address
                .clone()
                .context("failover.peer_address is required on the active side")?;
            let server_address = tokio::net::lookup_host(&peer_address)
                .await
                .with_context(|| format!("could not resolve peer address {peer_address}"))?
                .next()
                .with_context(|| format!("peer address {peer_address} resolved to nothing"))?;
            let server_name = config.failover.peer_name.clone().unwrap_or_else(|| {
                peer_address
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| peer_address.clone())
            });

            let active_identity: Pubkey = node
                .identities
                .active
                .pubkey
                .parse()
                .context("node.identities.active.pubkey is not a valid pubkey")?;

            let client = FailoverClient::new(
                ClientConfig {
                    node,
                    active_identity,
                    server_address,
                    server_name,
                    transport: transport_settings(&config),
                    hooks: config.hooks.clone(),
                    min_time_to_leader_slot: Duration::from_secs(
                        config.failover.min_time_to_leader_slot_secs,
                    ),
                    wait_for_leader_slot_gate: config.failover.wait_for_leader_slot,
                },
                chain,
            );

            spawn_shutdown_handler(client.cancellation_token());
            match client.run().await.context("failover failed")? {
                ClientOutcome::Completed => info!("failover finished - this node is passive"),
                ClientOutcome::RolledBack => {
                    warn!("failover rolled back - this node is active again")
                }
            }
        }
    }

    Ok(())
}

fn spawn_shutdown_handler(cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C - cancelling the session");
            cancel.cancel();
        }
    });
}
