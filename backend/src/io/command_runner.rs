//! Single-command execution with normalized results and bounded history.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::core::types::ExecutionResult;
use crate::io::audit_log::AuditLog;
use crate::io::boundary::ExecutionBoundary;

/// Ring buffer of execution results; the oldest result is evicted first.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<ExecutionResult>,
    capacity: usize,
    evicted: u64,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn push(&mut self, result: ExecutionResult) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Results dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ExecutionResult> {
        self.entries.back()
    }
}

/// Runs one command through the execution boundary.
///
/// Never fails: spawn errors and timeouts become unsuccessful
/// [`ExecutionResult`]s so they only advance the caller's retry stack.
pub struct CommandRunner {
    boundary: Arc<dyn ExecutionBoundary>,
    timeout: Duration,
    history: ExecutionHistory,
    audit: Option<AuditLog>,
}

impl CommandRunner {
    pub fn new(
        boundary: Arc<dyn ExecutionBoundary>,
        timeout: Duration,
        history_capacity: usize,
        audit: Option<AuditLog>,
    ) -> Self {
        Self {
            boundary,
            timeout,
            history: ExecutionHistory::new(history_capacity),
            audit,
        }
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    pub async fn run(&mut self, command: &str, cwd: &Path) -> ExecutionResult {
        let started = Instant::now();
        let result = match self.boundary.run(command, cwd, self.timeout).await {
            Ok(output) => ExecutionResult::new(
                command,
                output.exit_code,
                output.stdout,
                output.stderr,
                started.elapsed(),
            ),
            Err(err) => {
                warn!(command, err = %err, "command did not complete");
                ExecutionResult::aborted(command, err.to_string(), started.elapsed())
            }
        };
        debug!(command, exit_code = result.exit_code, "command finished");

        if let Some(audit) = &self.audit
            && let Err(err) = audit.append(cwd, &result).await
        {
            warn!(err = %err, "failed to append audit record");
        }

        let evicted_before = self.history.evicted();
        self.history.push(result.clone());
        if self.history.evicted() > evicted_before {
            debug!(evicted = self.history.evicted(), "execution history at capacity");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedBoundary;

    #[tokio::test]
    async fn boundary_errors_become_failed_results() {
        let boundary = Arc::new(ScriptedBoundary::new().timeout("sleep 100"));
        let mut runner = CommandRunner::new(boundary, Duration::from_secs(1), 10, None);
        let result = runner.run("sleep 100", Path::new("/tmp")).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
        assert_eq!(runner.history().len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let boundary = Arc::new(ScriptedBoundary::new());
        let mut runner = CommandRunner::new(boundary, Duration::from_secs(1), 3, None);
        for index in 0..5 {
            runner.run(&format!("echo {index}"), Path::new("/tmp")).await;
        }
        assert_eq!(runner.history().len(), 3);
        assert_eq!(runner.history().evicted(), 2);
        let commands: Vec<_> = runner.history().iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["echo 2", "echo 3", "echo 4"]);
    }

    #[tokio::test]
    async fn audit_log_receives_every_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let audit = AuditLog::new(temp.path().join("audit.jsonl"));
        let boundary = Arc::new(ScriptedBoundary::new().fail("make build", 2, "no rule"));
        let mut runner = CommandRunner::new(boundary, Duration::from_secs(1), 10, Some(audit));
        runner.run("make build", temp.path()).await;
        runner.run("echo done", temp.path()).await;
        let contents = std::fs::read_to_string(temp.path().join("audit.jsonl")).expect("read");
        assert_eq!(contents.lines().count(), 2);
    }
}
