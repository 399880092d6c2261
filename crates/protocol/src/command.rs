//! External command runner.
//!
//! Identity swaps and rollbacks happen through operator-configured shell
//! commands. The runner executes a tokenized argv synchronously (from the
//! protocol's point of view), streams child output into the log, and maps
//! the exit status. Dry-run is bound once at construction: under dry-run
//! every invocation is logged and reported successful without executing,
//! which is what makes a dry-run failover side-effect free.

use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command argv is empty")]
    Empty,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {code}")]
    ExitStatus { program: String, code: String },
}

/// Executes identity-swap and rollback commands, honoring dry-run.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `argv` to completion. Under dry-run, log and return success.
    pub async fn run(&self, argv: &[String]) -> Result<(), CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;

        if self.dry_run {
            info!(command = %argv.join(" "), "dry run - skipping command execution");
            return Ok(());
        }

        info!(command = %argv.join(" "), "running command");

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(stream_lines(stdout, program.clone(), "stdout"));
        let stderr_task = tokio::spawn(stream_lines(stderr, program.clone(), "stderr"));

        let status = child.wait().await.map_err(|source| CommandError::Wait {
            program: program.clone(),
            source,
        })?;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::ExitStatus {
                program: program.clone(),
                code: status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
            })
        }
    }
}

pub(crate) async fn stream_lines<R>(reader: Option<R>, program: String, stream: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    info!(command = %program, stream, "{line}");
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(command = %program, stream, error = %err, "output stream error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_ok() {
        let runner = CommandRunner::new(false);
        runner.run(&["true".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let runner = CommandRunner::new(false);
        let err = runner
            .run(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::ExitStatus { ref code, .. } if code == "3"));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let runner = CommandRunner::new(false);
        assert!(matches!(runner.run(&[]).await, Err(CommandError::Empty)));
    }

    #[tokio::test]
    async fn dry_run_does_not_execute() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("executed");

        let runner = CommandRunner::new(true);
        runner
            .run(&["touch".to_string(), marker.display().to_string()])
            .await
            .unwrap();

        assert!(!marker.exists(), "dry run must not execute the command");
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_error() {
        let runner = CommandRunner::new(false);
        let err = runner
            .run(&["slotswap-test-no-such-program".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
