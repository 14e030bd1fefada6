//! Bounded multi-step loop for requests the model flags as needing more
//! iterations.

use chrono::Utc;
use tracing::{Instrument, debug, info_span, instrument};

use crate::core::classifier::{iteration_marker, strip_markers};
use crate::core::format;
use crate::core::goal::{Continuation, GoalTracker, StopReason, TaskStatus, format_status};
use crate::core::types::{
    CompletionContext, CompletionRequest, IterationMarker, Resolution, ResolutionKind,
};
use crate::error::GoalError;
use crate::orchestrator::RetryOrchestrator;

/// Reason why `run_goal` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The model marked the goal complete (or stopped asking to continue).
    Completed,
    /// The model asked the user to choose or confirm something.
    NeedsUserInput,
    /// The goal used all of its iterations.
    IterationsExhausted,
    /// A continuation query failed; the turn ends.
    ModelFailure,
}

/// Summary of one goal run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalOutcome {
    pub stop: LoopStop,
    pub iterations: u32,
    /// Per-iteration output followed by the goal status block.
    pub text: String,
}

/// Drive `first_completion` and its continuations until the goal stops.
///
/// Each round resolves one completion through the orchestrator and records
/// the result as a task. The goal is archived before returning.
#[instrument(skip_all, fields(goal = %description))]
pub async fn run_goal(
    orchestrator: &mut RetryOrchestrator,
    tracker: &mut GoalTracker,
    description: &str,
    first_completion: &str,
    context: &CompletionContext,
) -> Result<GoalOutcome, GoalError> {
    tracker.create_goal(description, Utc::now())?;
    let mut completion = first_completion.to_string();
    let mut outputs: Vec<String> = Vec::new();
    let mut next_task: Option<usize> = None;

    let stop = loop {
        let iteration = tracker.increment_iteration()?;
        let task = match next_task.take() {
            Some(index) => {
                tracker.update_task(index, TaskStatus::InProgress, None, None)?;
                index
            }
            None => tracker.add_task(format!("Step {iteration}"), TaskStatus::InProgress)?,
        };

        let marker = iteration_marker(&completion);
        let body = strip_markers(&completion);
        let resolution = orchestrator
            .resolve(&body, context)
            .instrument(info_span!("iteration", iteration))
            .await;
        debug!(iteration, kind = ?resolution.kind, marker = ?marker, "iteration resolved");
        record(tracker, task, iteration, &resolution)?;
        outputs.push(resolution.text.trim_end().to_string());

        if resolution.kind == ResolutionKind::ModelFailure {
            break LoopStop::ModelFailure;
        }
        match marker {
            Some(IterationMarker::ContinueIteration) => {}
            Some(IterationMarker::NeedUserInput) => break LoopStop::NeedsUserInput,
            Some(IterationMarker::GoalComplete) | None => break LoopStop::Completed,
        }

        let pending = tracker.add_task(format!("Step {}", iteration + 1), TaskStatus::Pending)?;
        next_task = Some(pending);
        match tracker.should_continue() {
            Continuation::Continue => {}
            Continuation::Stop(StopReason::IterationsExhausted) => {
                tracker.update_task(
                    pending,
                    TaskStatus::Blocked,
                    None,
                    Some("iteration limit reached".to_string()),
                )?;
                break LoopStop::IterationsExhausted;
            }
            Continuation::Stop(StopReason::Completed) => break LoopStop::Completed,
            Continuation::Stop(StopReason::NoActiveGoal) => return Err(GoalError::NoActiveGoal),
        }

        let prompt = match orchestrator
            .prompts()
            .goal_continue(&tracker.iteration_context(), &resolution.text)
        {
            Ok(prompt) => prompt,
            Err(err) => {
                let failure = format::failure(&format!("could not build prompt: {err:#}"));
                outputs.push(failure.trim_end().to_string());
                break LoopStop::ModelFailure;
            }
        };
        let request = CompletionRequest::new(prompt, Some(context.clone()));
        completion = match orchestrator.gateway().query_with_retry(&request).await {
            Ok(text) => text,
            Err(err) => {
                tracker.update_task(pending, TaskStatus::Failed, None, Some(err.to_string()))?;
                outputs.push(format::model_failure(&err).trim_end().to_string());
                break LoopStop::ModelFailure;
            }
        };
    };

    let goal = tracker.complete_goal(stop == LoopStop::Completed, Utc::now())?;
    let iterations = goal.iteration;
    let mut text = outputs.join("\n\n");
    text.push_str("\n\n");
    text.push_str(&format_status(goal));
    match stop {
        LoopStop::IterationsExhausted => text.push_str(&format!(
            "\n\n⚠️ Stopped after {iterations} iterations without completing the goal"
        )),
        LoopStop::NeedsUserInput => text.push_str("\n\n❓ Waiting for your input"),
        LoopStop::Completed | LoopStop::ModelFailure => {}
    }
    text.push('\n');
    Ok(GoalOutcome {
        stop,
        iterations,
        text,
    })
}

fn record(
    tracker: &mut GoalTracker,
    task: usize,
    iteration: u32,
    resolution: &Resolution,
) -> Result<(), GoalError> {
    let summary = resolution
        .text
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string();
    if resolution.succeeded() {
        tracker.update_task(task, TaskStatus::Completed, Some(summary.clone()), None)?;
    } else {
        tracker.update_task(task, TaskStatus::Failed, None, Some(summary.clone()))?;
    }
    tracker.add_memory(format!("iteration {iteration}: {summary}"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::core::goal::GoalStatus;
    use crate::io::command_runner::CommandRunner;
    use crate::io::completion::ModelGateway;
    use crate::io::patch_engine::FilePatchEngine;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{ScriptedBoundary, ScriptedCompletion};

    fn orchestrator(
        completion: Arc<ScriptedCompletion>,
        boundary: Arc<ScriptedBoundary>,
        backups: &Path,
    ) -> RetryOrchestrator {
        RetryOrchestrator::new(
            CommandRunner::new(boundary, Duration::from_secs(5), 50, None),
            FilePatchEngine::new(backups),
            ModelGateway::new(completion, Duration::from_secs(5), Duration::ZERO),
            Arc::new(PromptEngine::new()),
        )
    }

    fn context(dir: &Path) -> CompletionContext {
        CompletionContext {
            working_dir: dir.to_path_buf(),
            ..CompletionContext::default()
        }
    }

    #[tokio::test]
    async fn continues_until_goal_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(
            ScriptedCompletion::new()
                .respond("awesh: kubectl apply -f monitoring.yaml\n✅ GOAL_COMPLETE"),
        );
        let boundary = Arc::new(
            ScriptedBoundary::new()
                .succeed("kubectl apply -f deploy.yaml", "deployment created\n")
                .succeed("kubectl apply -f monitoring.yaml", "monitor created\n"),
        );
        let mut engine = orchestrator(completion.clone(), boundary.clone(), temp.path());
        let mut tracker = GoalTracker::new(10);

        let outcome = run_goal(
            &mut engine,
            &mut tracker,
            "deploy with monitoring",
            "awesh: kubectl apply -f deploy.yaml\n🔄 CONTINUE_ITERATION",
            &context(temp.path()),
        )
        .await
        .expect("goal");

        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.text.contains("deployment created"));
        assert!(outcome.text.contains("monitor created"));
        assert!(outcome.text.contains("📊 Progress: 2/2 tasks (100%)"));
        assert_eq!(completion.calls(), 1);
        assert!(
            completion.prompts()[0]
                .contains("<current_goal>\nGoal: deploy with monitoring\nIteration: 1/10")
        );
        assert!(tracker.active().is_none());
        assert_eq!(tracker.history()[0].status, GoalStatus::Completed);
    }

    #[tokio::test]
    async fn stops_issuing_queries_at_the_iteration_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(
            ScriptedCompletion::new()
                .respond("Still working.\n🔄 CONTINUE_ITERATION")
                .respond("Still working.\n🔄 CONTINUE_ITERATION"),
        );
        let boundary = Arc::new(ScriptedBoundary::new());
        let mut engine = orchestrator(completion.clone(), boundary, temp.path());
        let mut tracker = GoalTracker::new(3);

        let outcome = run_goal(
            &mut engine,
            &mut tracker,
            "endless",
            "Starting.\n🔄 CONTINUE_ITERATION",
            &context(temp.path()),
        )
        .await
        .expect("goal");

        assert_eq!(outcome.stop, LoopStop::IterationsExhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(completion.calls(), 2);
        assert!(outcome.text.contains("Stopped after 3 iterations"));
        let archived = &tracker.history()[0];
        assert_eq!(archived.status, GoalStatus::Failed);
        assert_eq!(archived.tasks.last().map(|task| task.status), Some(TaskStatus::Blocked));
    }

    #[tokio::test]
    async fn need_user_input_ends_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::new());
        let mut engine =
            orchestrator(completion.clone(), Arc::new(ScriptedBoundary::new()), temp.path());
        let mut tracker = GoalTracker::default();

        let outcome = run_goal(
            &mut engine,
            &mut tracker,
            "pick a database",
            "Postgres or MySQL would both work here.\n❓ NEED_USER_INPUT",
            &context(temp.path()),
        )
        .await
        .expect("goal");

        assert_eq!(outcome.stop, LoopStop::NeedsUserInput);
        assert_eq!(completion.calls(), 0);
        assert!(outcome.text.starts_with("🤖 Postgres or MySQL would both work here."));
        assert!(!outcome.text.contains("NEED_USER_INPUT"));
    }

    #[tokio::test]
    async fn failed_continuation_query_ends_the_turn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::new().fail("503").fail("503"));
        let mut engine =
            orchestrator(completion.clone(), Arc::new(ScriptedBoundary::new()), temp.path());
        let mut tracker = GoalTracker::default();

        let outcome = run_goal(
            &mut engine,
            &mut tracker,
            "migrate",
            "Step one done.\n🔄 CONTINUE_ITERATION",
            &context(temp.path()),
        )
        .await
        .expect("goal");

        assert_eq!(outcome.stop, LoopStop::ModelFailure);
        assert_eq!(completion.calls(), 2);
        assert!(outcome.text.contains("❌ AI error"));
    }

    #[tokio::test]
    async fn second_goal_is_rejected_while_one_is_active() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut engine = orchestrator(
            Arc::new(ScriptedCompletion::new()),
            Arc::new(ScriptedBoundary::new()),
            temp.path(),
        );
        let mut tracker = GoalTracker::default();
        tracker.create_goal("existing", Utc::now()).expect("create");
        let reply = "x\n🔄 CONTINUE_ITERATION";
        let err = run_goal(&mut engine, &mut tracker, "new", reply, &context(temp.path()))
            .await
            .expect_err("rejected");
        assert_eq!(err, GoalError::AlreadyActive("existing".to_string()));
    }
}
