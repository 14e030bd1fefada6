//! Shared deterministic types for the response engine.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Intended effect of a completion, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One or more well-formed patch blocks.
    PatchEdit,
    /// At least one prefixed command line that survived the false-positive filter.
    CommandMode,
    /// A question or a list of options for the user.
    Disambiguation,
    /// Plain text passthrough.
    Informational,
}

/// A proposed search/replace edit, not yet validated against the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Target path as written by the model (may be relative or `~`-prefixed).
    pub file_path: String,
    /// Verbatim existing content; empty for new files.
    pub old_content: String,
    pub new_content: String,
}

/// A single actionable item extracted from a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionItem {
    Command { text: String },
    PatchBlock(FileEdit),
}

/// Output of the response classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mode: Mode,
    /// Commands or patch blocks in textual order (empty for the other modes).
    pub items: Vec<ActionItem>,
    /// Candidate options in textual order (only for `Disambiguation`).
    pub options: Vec<String>,
    /// Completion text with any thinking preamble removed.
    pub cleaned: String,
}

impl Classification {
    /// Command texts in extraction order.
    pub fn commands(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ActionItem::Command { text } => Some(text.clone()),
                ActionItem::PatchBlock(_) => None,
            })
            .collect()
    }

    /// Patch blocks in extraction order.
    pub fn edits(&self) -> Vec<FileEdit> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ActionItem::PatchBlock(edit) => Some(edit.clone()),
                ActionItem::Command { .. } => None,
            })
            .collect()
    }
}

/// Normalized outcome of one command run through the execution boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: exit_code == 0,
            elapsed,
        }
    }

    /// A failure that never reached a real exit status (spawn error, timeout).
    pub fn aborted(
        command: impl Into<String>,
        reason: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::new(command, -1, String::new(), reason, elapsed)
    }
}

/// Result of applying (or undoing) one file edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    pub success: bool,
    pub message: String,
    pub file_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub changes_applied: u32,
    /// The edit created a new file.
    pub created: bool,
}

impl EditResult {
    pub fn failed(file_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            file_path: file_path.into(),
            backup_path: None,
            changes_applied: 0,
            created: false,
        }
    }
}

/// Session context attached to a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionContext {
    pub working_dir: PathBuf,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
}

impl CompletionContext {
    /// Render the context block sent alongside the prompt.
    ///
    /// The exit code is only mentioned when it signals a failure.
    pub fn render(&self) -> String {
        let mut parts = vec![format!("Working directory: {}", self.working_dir.display())];
        if let Some(command) = self.last_command.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("Last command: {command}"));
        }
        if let Some(code) = self.last_exit_code.filter(|code| *code != 0) {
            parts.push(format!("Last command exit code: {code}"));
        }
        parts.join("\n")
    }
}

/// One user turn's request to the remote completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub context: Option<CompletionContext>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, context: Option<CompletionContext>) -> Self {
        Self {
            prompt: prompt.into(),
            context,
        }
    }
}

/// Loop-control marker the model appends to its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMarker {
    GoalComplete,
    ContinueIteration,
    NeedUserInput,
}

/// How a completion was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionKind {
    Informational,
    CommandSucceeded { command: String },
    CommandsExhausted { failed: Vec<String> },
    OptionsExhausted { options: Vec<String> },
    /// A question with no usable options and no commands from clarification.
    Unresolved,
    Patched { applied: usize, total: usize },
    /// The completion service failed for this turn.
    ModelFailure,
}

/// Final output of one resolution, with the text sent back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub text: String,
}

impl Resolution {
    pub fn new(kind: ResolutionKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Whether the resolution produced the effect the completion asked for.
    pub fn succeeded(&self) -> bool {
        match &self.kind {
            ResolutionKind::Informational | ResolutionKind::CommandSucceeded { .. } => true,
            ResolutionKind::Patched { applied, total } => applied == total && *total > 0,
            ResolutionKind::CommandsExhausted { .. }
            | ResolutionKind::OptionsExhausted { .. }
            | ResolutionKind::Unresolved
            | ResolutionKind::ModelFailure => false,
        }
    }
}
