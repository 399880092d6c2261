//! Hook callback interface.
//!
//! Four extension points fire at fixed protocol phases: pre/post crossed
//! with the role the node holds at that phase. Hooks are operator-defined
//! commands; each receives a fixed set of environment keys describing
//! both nodes. Pre-hooks may abort the failover when marked
//! `must_succeed`; post-hook failures are logged and ignored because the
//! failover is already complete.

use crate::command::stream_lines;
use serde::{Deserialize, Serialize};
use slotswap_types::{NodeInfo, NodeRole};
use std::collections::BTreeMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info};

/// One operator-defined callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Display name used in logs.
    pub name: String,
    /// Program to execute.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether a failure of this hook aborts a pre-failover sequence.
    #[serde(default)]
    pub must_succeed: bool,
    /// Extra environment entries; the fixed protocol keys win on conflict.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Hooks for one phase, split by the role the node holds when they run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseHooks {
    #[serde(default)]
    pub when_active: Vec<Hook>,
    #[serde(default)]
    pub when_passive: Vec<Hook>,
}

impl PhaseHooks {
    fn for_role(&self, role: NodeRole) -> &[Hook] {
        match role {
            NodeRole::Active => &self.when_active,
            NodeRole::Passive => &self.when_passive,
        }
    }
}

/// All hooks configured for a failover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    #[serde(default)]
    pub pre: PhaseHooks,
    #[serde(default)]
    pub post: PhaseHooks,
}

/// Errors from hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook {name} failed to spawn: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("hook {name} failed to complete: {source}")]
    Wait {
        name: String,
        source: std::io::Error,
    },

    #[error("hook {name} exited with {code}")]
    Failed { name: String, code: String },
}

/// The fixed environment handed to every hook.
///
/// Built once per phase from both node records; the key set is part of
/// the tool's external contract.
#[derive(Debug, Clone)]
pub struct HookEnv {
    vars: BTreeMap<String, String>,
}

impl HookEnv {
    pub fn new(this: &NodeInfo, peer: &NodeInfo, this_role: NodeRole, is_dry_run: bool) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(
            "IS_DRY_RUN_FAILOVER".to_string(),
            is_dry_run.to_string(),
        );
        vars.insert("THIS_NODE_ROLE".to_string(), this_role.to_string());
        vars.insert("PEER_NODE_ROLE".to_string(), this_role.peer().to_string());

        vars.insert("THIS_NODE_NAME".to_string(), this.hostname.clone());
        vars.insert("THIS_NODE_PUBLIC_IP".to_string(), this.public_ip.to_string());
        vars.insert(
            "THIS_NODE_ACTIVE_IDENTITY_PUBKEY".to_string(),
            this.identities.active.pubkey.clone(),
        );
        vars.insert(
            "THIS_NODE_ACTIVE_IDENTITY_KEYPAIR_FILE".to_string(),
            this.identities.active.keypair_file.display().to_string(),
        );
        vars.insert(
            "THIS_NODE_PASSIVE_IDENTITY_PUBKEY".to_string(),
            this.identities.passive.pubkey.clone(),
        );
        vars.insert(
            "THIS_NODE_PASSIVE_IDENTITY_KEYPAIR_FILE".to_string(),
            this.identities.passive.keypair_file.display().to_string(),
        );
        vars.insert(
            "THIS_NODE_CLIENT_VERSION".to_string(),
            this.client_version.clone(),
        );
        vars.insert("THIS_NODE_RPC_ADDRESS".to_string(), this.rpc_address.clone());

        vars.insert("PEER_NODE_NAME".to_string(), peer.hostname.clone());
        vars.insert("PEER_NODE_PUBLIC_IP".to_string(), peer.public_ip.to_string());
        vars.insert(
            "PEER_NODE_ACTIVE_IDENTITY_PUBKEY".to_string(),
            peer.identities.active.pubkey.clone(),
        );
        vars.insert(
            "PEER_NODE_PASSIVE_IDENTITY_PUBKEY".to_string(),
            peer.identities.passive.pubkey.clone(),
        );
        vars.insert(
            "PEER_NODE_CLIENT_VERSION".to_string(),
            peer.client_version.clone(),
        );

        Self { vars }
    }

    /// The fixed key/value pairs, sorted by key.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl HookSet {
    /// Run the pre-failover hooks for `role` in declaration order.
    ///
    /// A failing hook marked `must_succeed` aborts the sequence; other
    /// failures are logged and the sequence continues.
    pub async fn run_pre(&self, role: NodeRole, env: &HookEnv) -> Result<(), HookError> {
        let hooks = self.pre.for_role(role);
        for (index, hook) in hooks.iter().enumerate() {
            match run_hook(hook, env, "pre", index + 1, hooks.len()).await {
                Ok(()) => {}
                Err(err) if hook.must_succeed => return Err(err),
                Err(err) => {
                    error!(hook = %hook.name, error = %err, "pre hook failed - must_succeed is false, continuing");
                }
            }
        }
        Ok(())
    }

    /// Run the post-failover hooks for `role`. Failures are logged only.
    pub async fn run_post(&self, role: NodeRole, env: &HookEnv) {
        let hooks = self.post.for_role(role);
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(err) = run_hook(hook, env, "post", index + 1, hooks.len()).await {
                error!(hook = %hook.name, error = %err, "post hook failed");
            }
        }
    }
}

async fn run_hook(
    hook: &Hook,
    env: &HookEnv,
    phase: &'static str,
    index: usize,
    total: usize,
) -> Result<(), HookError> {
    info!(
        phase,
        hook = %hook.name,
        position = %format!("{index}/{total}"),
        command = %hook.command,
        "running hook"
    );

    let mut child = Command::new(&hook.command)
        .args(&hook.args)
        // Per-hook entries first; the fixed protocol keys override them.
        .envs(&hook.environment)
        .envs(env.vars())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| HookError::Spawn {
            name: hook.name.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(stream_lines(stdout, hook.name.clone(), "stdout"));
    let stderr_task = tokio::spawn(stream_lines(stderr, hook.name.clone(), "stderr"));

    let status = child.wait().await.map_err(|source| HookError::Wait {
        name: hook.name.clone(),
        source,
    })?;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if status.success() {
        info!(phase, hook = %hook.name, "hook completed");
        Ok(())
    } else {
        Err(HookError::Failed {
            name: hook.name.clone(),
            code: status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotswap_types::{Identity, IdentitySet};
    use std::path::PathBuf;

    fn node(name: &str, ip: &str) -> NodeInfo {
        NodeInfo {
            hostname: name.to_string(),
            public_ip: ip.parse().unwrap(),
            client_version: "2.1.13".to_string(),
            app_version: "0.4.1".to_string(),
            rpc_address: "http://127.0.0.1:8899".to_string(),
            tower_file: PathBuf::from("/tmp/tower.bin"),
            tower_file_bytes: vec![],
            tower_file_hash: String::new(),
            set_identity_cmd: vec!["true".to_string()],
            identities: IdentitySet {
                active: Identity {
                    pubkey: format!("{name}-active"),
                    keypair_file: PathBuf::from("/keys/active.json"),
                },
                passive: Identity {
                    pubkey: format!("{name}-passive"),
                    keypair_file: PathBuf::from("/keys/passive.json"),
                },
            },
            rollback_enabled: false,
        }
    }

    fn test_env(role: NodeRole) -> HookEnv {
        HookEnv::new(&node("this", "10.0.0.1"), &node("peer", "10.0.0.2"), role, true)
    }

    fn sh(name: &str, script: &str, must_succeed: bool) -> Hook {
        Hook {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            must_succeed,
            environment: BTreeMap::new(),
        }
    }

    #[test]
    fn env_carries_the_fixed_key_set() {
        let env = test_env(NodeRole::Passive);
        let vars = env.vars();
        for key in [
            "IS_DRY_RUN_FAILOVER",
            "THIS_NODE_ROLE",
            "PEER_NODE_ROLE",
            "THIS_NODE_NAME",
            "THIS_NODE_PUBLIC_IP",
            "THIS_NODE_ACTIVE_IDENTITY_PUBKEY",
            "THIS_NODE_ACTIVE_IDENTITY_KEYPAIR_FILE",
            "THIS_NODE_PASSIVE_IDENTITY_PUBKEY",
            "THIS_NODE_PASSIVE_IDENTITY_KEYPAIR_FILE",
            "THIS_NODE_CLIENT_VERSION",
            "THIS_NODE_RPC_ADDRESS",
            "PEER_NODE_NAME",
            "PEER_NODE_PUBLIC_IP",
            "PEER_NODE_ACTIVE_IDENTITY_PUBKEY",
            "PEER_NODE_PASSIVE_IDENTITY_PUBKEY",
            "PEER_NODE_CLIENT_VERSION",
        ] {
            assert!(vars.contains_key(key), "missing env key {key}");
        }
        assert_eq!(vars["THIS_NODE_ROLE"], "passive");
        assert_eq!(vars["PEER_NODE_ROLE"], "active");
        assert_eq!(vars["IS_DRY_RUN_FAILOVER"], "true");
    }

    #[tokio::test]
    async fn hooks_see_the_protocol_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("role");

        let hooks = HookSet {
            pre: PhaseHooks {
                when_active: vec![sh(
                    "record-role",
                    &format!("printf '%s' \"$THIS_NODE_ROLE\" > {}", out.display()),
                    true,
                )],
                when_passive: vec![],
            },
            post: PhaseHooks::default(),
        };

        hooks
            .run_pre(NodeRole::Active, &test_env(NodeRole::Active))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "active");
    }

    #[tokio::test]
    async fn must_succeed_failure_aborts_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-after");

        let hooks = HookSet {
            pre: PhaseHooks {
                when_passive: vec![
                    sh("fails", "exit 1", true),
                    sh("after", &format!("touch {}", marker.display()), false),
                ],
                when_active: vec![],
            },
            post: PhaseHooks::default(),
        };

        let err = hooks
            .run_pre(NodeRole::Passive, &test_env(NodeRole::Passive))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Failed { .. }));
        assert!(!marker.exists(), "later hooks must not run after a must_succeed failure");
    }

    #[tokio::test]
    async fn non_fatal_failure_continues_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-after");

        let hooks = HookSet {
            pre: PhaseHooks {
                when_passive: vec![
                    sh("fails", "exit 1", false),
                    sh("after", &format!("touch {}", marker.display()), false),
                ],
                when_active: vec![],
            },
            post: PhaseHooks::default(),
        };

        hooks
            .run_pre(NodeRole::Passive, &test_env(NodeRole::Passive))
            .await
            .unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn post_hook_failures_are_swallowed() {
        let hooks = HookSet {
            pre: PhaseHooks::default(),
            post: PhaseHooks {
                when_active: vec![sh("fails", "exit 1", true)],
                when_passive: vec![],
            },
        };

        // Does not return a Result; a panic or hang here would fail the test.
        hooks
            .run_post(NodeRole::Active, &test_env(NodeRole::Active))
            .await;
    }
}
