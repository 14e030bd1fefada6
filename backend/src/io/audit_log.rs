//! Append-only JSONL audit log of executed commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::core::types::ExecutionResult;

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    cwd: &'a Path,
    command: &'a str,
    exit_code: i32,
    success: bool,
    elapsed_ms: u64,
    stdout_bytes: usize,
    stderr_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; the parent directory is created if needed.
    pub async fn append(&self, cwd: &Path, result: &ExecutionResult) -> Result<()> {
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            cwd,
            command: &result.command,
            exit_code: result.exit_code,
            success: result.success,
            elapsed_ms: u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            stdout_bytes: result.stdout.len(),
            stderr_bytes: result.stderr.len(),
        };
        let mut line = serde_json::to_string(&record).context("serialize audit record")?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("append {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flush {}", self.path.display()))?;
        Ok(())
    }
}
