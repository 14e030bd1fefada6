//! Scripted collaborators for exercising the engine without a model or a shell.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::types::CompletionRequest;
use crate::error::{ExecutionError, ModelError};
use crate::io::boundary::{ExecutionBoundary, RawOutput};
use crate::io::completion::{CompletionProvider, CompletionService, CompletionStream};

enum Reply {
    Chunks(Vec<String>),
    Fail(String),
    Stall,
}

/// Completion service that answers from a queue and records every request.
///
/// Requests beyond the scripted replies fail with a request error.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        self.push(Reply::Chunks(vec![text.to_string()]))
    }

    pub fn respond_chunks(self, chunks: &[&str]) -> Self {
        self.push(Reply::Chunks(chunks.iter().map(|c| c.to_string()).collect()))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Reply::Fail(message.to_string()))
    }

    /// A reply whose stream never yields.
    pub fn stall(self) -> Self {
        self.push(Reply::Stall)
    }

    fn push(self, reply: Reply) -> Self {
        self.replies.lock().expect("replies lock").push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.prompt).collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionStream, ModelError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        let reply = self.replies.lock().expect("replies lock").pop_front();
        match reply {
            Some(Reply::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, ModelError>),
            ))),
            Some(Reply::Fail(message)) => Err(ModelError::Request(message)),
            Some(Reply::Stall) => Ok(Box::pin(futures::stream::pending())),
            None => Err(ModelError::Request("no scripted reply left".to_string())),
        }
    }
}

/// Provider that hands every session the same service, or none at all.
pub struct FixedProvider {
    service: Option<Arc<ScriptedCompletion>>,
    connected: Mutex<Vec<String>>,
}

impl FixedProvider {
    pub fn new(service: Arc<ScriptedCompletion>) -> Self {
        Self {
            service: Some(service),
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            service: None,
            connected: Mutex::new(Vec::new()),
        }
    }

    /// Provider names requested so far, one per session.
    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().expect("connected lock").clone()
    }
}

impl CompletionProvider for FixedProvider {
    fn connect(&self, provider: &str) -> Result<Arc<dyn CompletionService>, ModelError> {
        self.connected
            .lock()
            .expect("connected lock")
            .push(provider.to_string());
        match &self.service {
            Some(service) => Ok(service.clone()),
            None => Err(ModelError::Unavailable(format!("{provider} is not configured"))),
        }
    }
}

enum Outcome {
    Output(RawOutput),
    Timeout,
}

/// Execution boundary with per-command outcomes; unscripted commands succeed
/// with empty output. Every command run is recorded.
#[derive(Default)]
pub struct ScriptedBoundary {
    outcomes: HashMap<String, Outcome>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, command: &str, stdout: &str) -> Self {
        self.outcomes.insert(
            command.to_string(),
            Outcome::Output(RawOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
        self
    }

    pub fn fail(mut self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.outcomes.insert(
            command.to_string(),
            Outcome::Output(RawOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
        self
    }

    pub fn timeout(mut self, command: &str) -> Self {
        self.outcomes.insert(command.to_string(), Outcome::Timeout);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed lock").clone()
    }
}

#[async_trait]
impl ExecutionBoundary for ScriptedBoundary {
    async fn run(
        &self,
        command: &str,
        _cwd: &Path,
        timeout: Duration,
    ) -> Result<RawOutput, ExecutionError> {
        self.executed
            .lock()
            .expect("executed lock")
            .push(command.to_string());
        match self.outcomes.get(command) {
            Some(Outcome::Output(output)) => Ok(output.clone()),
            Some(Outcome::Timeout) => Err(ExecutionError::Timeout(timeout)),
            None => Ok(RawOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}
