//! Failure taxonomy for the backend.
//!
//! Each enum covers one class of failure. Per-item failures (one command, one
//! patch block) are converted into structured results before they leave the
//! component that produced them; only [`TransportError`] ends a session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Socket-level failures. The session terminates, nothing is retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("message is not valid UTF-8")]
    InvalidEncoding,
}

/// Remote-completion failures.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No provider could be built (missing credentials, unknown provider).
    #[error("AI not available: {0}")]
    Unavailable(String),

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion stream failed: {0}")]
    Stream(String),

    #[error("completion was empty")]
    Empty,

    #[error("completion timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ModelError {
    /// Timeouts end the turn; other failures get one automatic re-query.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ModelError::Timeout(_))
    }
}

/// A command could not be run to completion by the execution boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("execution worker failed: {0}")]
    Worker(String),
}

/// File patch failures. The target file is never left half-written.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("old content not found in {} (the file may have changed)", .0.display())]
    ContentMismatch(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no edits to undo")]
    NothingToUndo,

    #[error("backup not found: {}", .0.display())]
    BackupMissing(PathBuf),

    #[error("backup name does not encode an original path: {}", .0.display())]
    UnrecognizedBackup(PathBuf),

    #[error("patch worker failed: {0}")]
    Worker(String),
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Goal bookkeeping failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GoalError {
    #[error("a goal is already active: {0}")]
    AlreadyActive(String),

    #[error("no active goal")]
    NoActiveGoal,

    #[error("task index {0} out of range")]
    UnknownTask(usize),
}
