//! Resolution of one completion into its effect.
//!
//! [`RetryOrchestrator::resolve`] classifies a completion and then:
//!
//! - passes informational text through,
//! - tries extracted commands in order until one succeeds, with a single
//!   alternatives re-query once the stack is empty,
//! - resolves a question by trying its options one at a time,
//! - applies patch blocks through the [`FilePatchEngine`].
//!
//! Depth is bounded: alternatives are requested at most once per call, and
//! command stacks inside option trials never request alternatives.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::classifier::{classify, clean_thinking, extract_commands, strip_markers};
use crate::core::edit_block::preamble;
use crate::core::format;
use crate::core::types::{
    Classification, CompletionContext, CompletionRequest, EditResult, Mode, Resolution,
    ResolutionKind,
};
use crate::error::ModelError;
use crate::io::command_runner::CommandRunner;
use crate::io::completion::ModelGateway;
use crate::io::patch_engine::{FilePatchEngine, resolve_path};
use crate::io::prompt::PromptEngine;

/// Whether a command stack may still ask the model for alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alternatives {
    Allowed,
    Spent,
}

pub struct RetryOrchestrator {
    runner: CommandRunner,
    patches: FilePatchEngine,
    gateway: ModelGateway,
    prompts: Arc<PromptEngine>,
}

impl RetryOrchestrator {
    pub fn new(
        runner: CommandRunner,
        patches: FilePatchEngine,
        gateway: ModelGateway,
        prompts: Arc<PromptEngine>,
    ) -> Self {
        Self {
            runner,
            patches,
            gateway,
            prompts,
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn patches_mut(&mut self) -> &mut FilePatchEngine {
        &mut self.patches
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    pub fn prompts(&self) -> &PromptEngine {
        &self.prompts
    }

    #[instrument(skip_all, fields(working_dir = %context.working_dir.display()))]
    pub async fn resolve(&mut self, text: &str, context: &CompletionContext) -> Resolution {
        let classification = classify(text);
        debug!(
            mode = ?classification.mode,
            items = classification.items.len(),
            "classified completion"
        );
        match classification.mode {
            Mode::Informational => Resolution::new(
                ResolutionKind::Informational,
                format::informational(&classification.cleaned),
            ),
            Mode::CommandMode => {
                self.run_stack(classification.commands(), context, Alternatives::Allowed)
                    .await
            }
            Mode::Disambiguation => self.resolve_question(&classification, context).await,
            Mode::PatchEdit => self.apply_patches(&classification, &context.working_dir).await,
        }
    }

    /// First-success command stack.
    async fn run_stack(
        &mut self,
        commands: Vec<String>,
        context: &CompletionContext,
        mut alternatives: Alternatives,
    ) -> Resolution {
        let mut stack: VecDeque<String> = commands.into();
        let mut failed = Vec::new();
        loop {
            while let Some(command) = stack.pop_front() {
                let result = self.runner.run(&command, &context.working_dir).await;
                if result.success {
                    if !stack.is_empty() {
                        debug!(
                            skipped = stack.len(),
                            "command succeeded, remaining alternatives skipped"
                        );
                    }
                    return Resolution::new(
                        ResolutionKind::CommandSucceeded { command },
                        format::command_success(&result),
                    );
                }
                debug!(command = %command, exit_code = result.exit_code, "command failed");
                failed.push(command);
            }

            if alternatives == Alternatives::Spent {
                let text = format::commands_failed(&failed);
                return Resolution::new(ResolutionKind::CommandsExhausted { failed }, text);
            }
            alternatives = Alternatives::Spent;

            let prompt = match self.prompts.alternatives(&failed) {
                Ok(prompt) => prompt,
                Err(err) => return render_failure(&err),
            };
            let reply = match self.query(prompt, context).await {
                Ok(reply) => reply,
                Err(err) => {
                    let text = format!(
                        "{}{}",
                        format::commands_failed(&failed),
                        format::model_failure(&err)
                    );
                    return Resolution::new(ResolutionKind::ModelFailure, text);
                }
            };
            let cleaned = strip_markers(&clean_thinking(&reply));
            let next = extract_commands(&cleaned);
            if next.is_empty() {
                let text = format::commands_exhausted(&failed, &cleaned);
                return Resolution::new(ResolutionKind::CommandsExhausted { failed }, text);
            }
            debug!(alternatives = next.len(), "retrying with alternative commands");
            stack.extend(next);
        }
    }

    /// Try each option in order; at most one sub-query per option.
    async fn resolve_question(
        &mut self,
        classification: &Classification,
        context: &CompletionContext,
    ) -> Resolution {
        if classification.options.is_empty() {
            return self.clarify(&classification.cleaned, context).await;
        }

        for option in &classification.options {
            let prompt = match self.prompts.option(option) {
                Ok(prompt) => prompt,
                Err(err) => return render_failure(&err),
            };
            let reply = match self.query(prompt, context).await {
                Ok(reply) => reply,
                Err(err) if err.is_timeout() => {
                    return Resolution::new(
                        ResolutionKind::ModelFailure,
                        format::model_failure(&err),
                    );
                }
                Err(err) => {
                    warn!(option = %option, err = %err, "option query failed");
                    continue;
                }
            };
            let commands = extract_commands(&clean_thinking(&reply));
            if commands.is_empty() {
                debug!(option = %option, "option produced no commands");
                continue;
            }
            let resolution = self.run_stack(commands, context, Alternatives::Spent).await;
            if resolution.succeeded() {
                return resolution;
            }
        }

        let options = classification.options.clone();
        let text = format::options_exhausted(&options);
        Resolution::new(ResolutionKind::OptionsExhausted { options }, text)
    }

    async fn clarify(&mut self, original: &str, context: &CompletionContext) -> Resolution {
        let prompt = match self.prompts.clarify(original) {
            Ok(prompt) => prompt,
            Err(err) => return render_failure(&err),
        };
        match self.query(prompt, context).await {
            Ok(reply) => {
                let commands = extract_commands(&clean_thinking(&reply));
                if commands.is_empty() {
                    Resolution::new(
                        ResolutionKind::Unresolved,
                        format::clarification_failed(original),
                    )
                } else {
                    self.run_stack(commands, context, Alternatives::Spent).await
                }
            }
            Err(err) => Resolution::new(ResolutionKind::ModelFailure, format::model_failure(&err)),
        }
    }

    /// Patch I/O runs on the blocking pool.
    async fn apply_patches(
        &mut self,
        classification: &Classification,
        working_dir: &Path,
    ) -> Resolution {
        let edits = classification.edits();
        let results = match self
            .patches
            .apply_all_in_worker(edits.clone(), working_dir.to_path_buf())
            .await
        {
            Ok(results) => results,
            Err(err) => edits
                .iter()
                .map(|edit| {
                    let path = resolve_path(&edit.file_path, working_dir);
                    EditResult::failed(path, format!("Failed to apply edit: {err}"))
                })
                .collect(),
        };
        let scripts: Vec<&Path> = results
            .iter()
            .filter(|result| result.success && result.created)
            .filter(|result| {
                edits.iter().any(|edit| {
                    resolve_path(&edit.file_path, working_dir) == result.file_path
                        && format::is_script(&result.file_path, &edit.new_content)
                })
            })
            .map(|result| result.file_path.as_path())
            .collect();

        let applied = results.iter().filter(|result| result.success).count();
        let total = results.len();
        let prose = preamble(&classification.cleaned);
        let text = format::patch_summary(prose.as_deref(), &results, &scripts);
        Resolution::new(ResolutionKind::Patched { applied, total }, text)
    }

    async fn query(
        &self,
        prompt: String,
        context: &CompletionContext,
    ) -> Result<String, ModelError> {
        self.gateway
            .query(&CompletionRequest::new(prompt, Some(context.clone())))
            .await
    }
}

fn render_failure(err: &anyhow::Error) -> Resolution {
    Resolution::new(
        ResolutionKind::ModelFailure,
        format::failure(&format!("could not build prompt: {err:#}")),
    )
}
