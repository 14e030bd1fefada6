//! Execution boundary abstraction.
//!
//! The [`ExecutionBoundary`] trait decouples command sequencing from the
//! subsystem that actually runs a shell command. Tests use scripted boundaries
//! that return predetermined outputs without spawning processes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::ExecutionError;
use crate::io::process::run_shell;

/// Exit status and captured output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over local command execution.
#[async_trait]
pub trait ExecutionBoundary: Send + Sync {
    /// Run `command` in `cwd`, abandoning it after `timeout`.
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutionError>;
}

/// Boundary that runs commands through `sh -c` on a blocking worker thread.
#[derive(Debug, Clone)]
pub struct ShellBoundary {
    output_limit_bytes: usize,
}

impl ShellBoundary {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

#[async_trait]
impl ExecutionBoundary for ShellBoundary {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutionError> {
        debug!(command, cwd = %cwd.display(), "running shell command");
        let command = command.to_string();
        let cwd = cwd.to_path_buf();
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || run_shell(&command, &cwd, timeout, limit))
            .await
            .map_err(|err| ExecutionError::Worker(err.to_string()))?
            .map_err(|err| ExecutionError::Spawn(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ExecutionError::Timeout(timeout));
        }
        Ok(RawOutput {
            exit_code: output.exit_code,
            stdout: output.stdout.into_text("stdout"),
            stderr: output.stderr.into_text("stderr"),
        })
    }
}
