//! Per-connection request handling.
//!
//! A [`SessionManager`] owns everything one frontend connection accumulates:
//! the working directory, the last command and exit code, its own command
//! history, undo stack and goal tracker. Process-wide settings are read
//! through the shared [`Settings`] handle.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::classifier::{iteration_marker, strip_markers};
use crate::core::control::{BashFailure, ControlMessage, VerboseArg};
use crate::core::format;
use crate::core::goal::GoalTracker;
use crate::core::types::{CompletionContext, CompletionRequest, IterationMarker};
use crate::error::ModelError;
use crate::goal_loop::run_goal;
use crate::io::audit_log::AuditLog;
use crate::io::boundary::ExecutionBoundary;
use crate::io::command_runner::CommandRunner;
use crate::io::completion::{
    CompletionProvider, CompletionService, ModelGateway, UnavailableCompletion,
};
use crate::io::config::{BackendConfig, PROVIDERS, expand_home};
use crate::io::file_agent::FileReferenceAgent;
use crate::io::patch_engine::FilePatchEngine;
use crate::io::prompt::{BashOutcome, PromptEngine};
use crate::orchestrator::RetryOrchestrator;
use crate::settings::Settings;

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<BackendConfig>,
    pub settings: Arc<Settings>,
    pub prompts: Arc<PromptEngine>,
    pub providers: Arc<dyn CompletionProvider>,
    pub boundary: Arc<dyn ExecutionBoundary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepting,
    Active,
    Closing,
}

/// Context accumulated over one connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub working_dir: PathBuf,
    pub last_user_command: Option<String>,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
    pub ai_ready: bool,
    pub state: SessionState,
}

impl Session {
    fn context(&self) -> CompletionContext {
        CompletionContext {
            working_dir: self.working_dir.clone(),
            last_command: self.last_command.clone(),
            last_exit_code: self.last_exit_code,
        }
    }
}

pub struct SessionManager {
    deps: SessionDeps,
    session: Session,
    orchestrator: RetryOrchestrator,
    goals: GoalTracker,
    file_agent: FileReferenceAgent,
}

impl SessionManager {
    /// Build a session using the provider currently recorded in settings.
    ///
    /// A provider that cannot be connected leaves the session running with
    /// AI marked as not ready.
    pub fn new(deps: SessionDeps, working_dir: PathBuf) -> Self {
        let provider = deps.settings.provider();
        let (service, ai_ready): (Arc<dyn CompletionService>, bool) =
            match deps.providers.connect(&provider) {
                Ok(service) => (service, true),
                Err(err) => {
                    warn!(provider = %provider, err = %err, "completion provider unavailable");
                    (Arc::new(UnavailableCompletion::new(err.to_string())), false)
                }
            };

        let config = deps.config.as_ref();
        let audit = config
            .audit_log_enabled
            .then(|| AuditLog::new(expand_home(&config.paths.audit_log)));
        let runner = CommandRunner::new(
            deps.boundary.clone(),
            config.limits.command_timeout(),
            config.limits.history_capacity,
            audit,
        );
        let patches = FilePatchEngine::new(expand_home(&config.paths.backup_dir));
        let gateway = ModelGateway::new(
            service,
            config.limits.completion_timeout(),
            config.limits.empty_retry_delay(),
        );
        let orchestrator = RetryOrchestrator::new(runner, patches, gateway, deps.prompts.clone());
        let goals = GoalTracker::new(config.limits.max_goal_iterations);
        let file_agent = FileReferenceAgent::new(config.file_agent.clone());

        Self {
            session: Session {
                working_dir,
                last_user_command: None,
                last_command: None,
                last_exit_code: None,
                ai_ready,
                state: SessionState::Accepting,
            },
            deps,
            orchestrator,
            goals,
            file_agent,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// The connection is established; requests may be handled.
    pub fn activate(&mut self) {
        self.session.state = SessionState::Active;
    }

    /// EOF or a transport failure.
    pub fn close(&mut self) {
        self.session.state = SessionState::Closing;
    }

    /// Produce the single reply for one inbound message.
    #[instrument(skip_all, fields(message = message_kind(&message)))]
    pub async fn handle(&mut self, message: ControlMessage) -> String {
        match message {
            ControlMessage::Status => {
                let status = if self.session.ai_ready { "AI_READY" } else { "AI_LOADING" };
                status.to_string()
            }
            ControlMessage::Cwd(path) => {
                debug!(cwd = %path.display(), "working directory synced");
                self.session.working_dir = path;
                "OK".to_string()
            }
            ControlMessage::Verbose(arg) => self.verbose(arg),
            ControlMessage::AiProvider(name) => self.switch_provider(&name),
            ControlMessage::Undo => {
                match self.orchestrator.patches_mut().undo_last_in_worker().await {
                    Ok(result) => format::edit_result(&result),
                    Err(err) => format::failure(&err.to_string()),
                }
            }
            ControlMessage::BashFailed(failure) => self.bash_failed(failure).await,
            ControlMessage::Prompt(prompt) => self.handle_prompt(&prompt, None).await,
            ControlMessage::Malformed(reason) => format::failure(&reason),
        }
    }

    fn verbose(&self, arg: VerboseArg) -> String {
        let settings = &self.deps.settings;
        match arg {
            VerboseArg::On => {
                settings.set_verbose(true);
                "🔧 Verbose mode enabled\n".to_string()
            }
            VerboseArg::Off => {
                settings.set_verbose(false);
                "🔇 Verbose mode disabled\n".to_string()
            }
            VerboseArg::Query => {
                let state = if settings.verbose() { "enabled" } else { "disabled" };
                format!("🔧 Verbose mode: {state}\n")
            }
        }
    }

    fn switch_provider(&self, name: &str) -> String {
        let name = name.to_ascii_lowercase();
        if !PROVIDERS.contains(&name.as_str()) {
            return format!("❌ Unknown AI provider: {name}\n");
        }
        self.deps.settings.set_provider(name.as_str());
        format!("🤖 Switching to {name}... (restart awesh to take effect)\n")
    }

    async fn bash_failed(&mut self, failure: BashFailure) -> String {
        let BashFailure {
            exit_code,
            command,
            temp_path,
        } = failure;
        let output = match tokio::fs::read_to_string(&temp_path).await {
            Ok(contents) => contents.trim().to_string(),
            Err(err) => {
                debug!(path = %temp_path.display(), err = %err, "bash output unreadable");
                format!("Command failed with exit code {exit_code}")
            }
        };
        self.session.last_command = Some(command.clone());
        self.session.last_exit_code = Some(exit_code);

        let (stdout, stderr) = if exit_code == 0 {
            (output, String::new())
        } else {
            (String::new(), output)
        };
        let bash = BashOutcome {
            exit_code,
            stdout,
            stderr,
        };
        self.handle_prompt(&command, Some(bash)).await
    }

    async fn handle_prompt(&mut self, prompt: &str, bash: Option<BashOutcome>) -> String {
        self.session.last_user_command = Some(prompt.to_string());
        if !self.session.ai_ready {
            return match bash {
                Some(bash) => format!("{}{}", bash.stdout, bash.stderr),
                None => format::model_failure(&ModelError::Unavailable(String::new())),
            };
        }

        let enriched = self.enrich(prompt).await;
        let rendered = match self.deps.prompts.turn(&enriched, bash.as_ref()) {
            Ok(rendered) => rendered,
            Err(err) => return format::failure(&format!("could not build prompt: {err:#}")),
        };
        let context = self.session.context();
        let request = CompletionRequest::new(rendered, Some(context.clone()));
        let completion = match self.orchestrator.gateway().query_with_retry(&request).await {
            Ok(text) => text,
            Err(err) => return format::model_failure(&err),
        };

        let runs_before = self.runs_recorded();
        let reply = if iteration_marker(&completion) == Some(IterationMarker::ContinueIteration)
            && self.goals.active().is_none()
        {
            match run_goal(
                &mut self.orchestrator,
                &mut self.goals,
                prompt,
                &completion,
                &context,
            )
            .await
            {
                Ok(outcome) => outcome.text,
                Err(err) => format::failure(&err.to_string()),
            }
        } else {
            let body = strip_markers(&completion);
            self.orchestrator.resolve(&body, &context).await.text
        };

        if self.runs_recorded() != runs_before
            && let Some(last) = self.orchestrator.runner().history().last()
        {
            self.session.last_command = Some(last.command.clone());
            self.session.last_exit_code = Some(last.exit_code);
        }
        reply
    }

    /// Prepend referenced file contents; the filesystem walk runs off the
    /// event loop.
    async fn enrich(&self, prompt: &str) -> String {
        let agent = self.file_agent.clone();
        let owned = prompt.to_string();
        let working_dir = self.session.working_dir.clone();
        match tokio::task::spawn_blocking(move || agent.enrich(&owned, &working_dir)).await {
            Ok((enriched, files)) => {
                if !files.is_empty() {
                    debug!(files = files.len(), "attached referenced files");
                }
                enriched
            }
            Err(err) => {
                warn!(err = %err, "file reference lookup failed");
                prompt.to_string()
            }
        }
    }

    fn runs_recorded(&self) -> u64 {
        let history = self.orchestrator.runner().history();
        history.len() as u64 + history.evicted()
    }
}

fn message_kind(message: &ControlMessage) -> &'static str {
    match message {
        ControlMessage::Status => "status",
        ControlMessage::Cwd(_) => "cwd",
        ControlMessage::Verbose(_) => "verbose",
        ControlMessage::AiProvider(_) => "ai_provider",
        ControlMessage::BashFailed(_) => "bash_failed",
        ControlMessage::Undo => "undo",
        ControlMessage::Prompt(_) => "prompt",
        ControlMessage::Malformed(_) => "malformed",
    }
}
