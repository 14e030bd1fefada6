//! Goal and task bookkeeping for multi-step requests.
//!
//! A [`GoalTracker`] holds at most one active [`Goal`]. Finished goals move to
//! the tracker's history. The iteration counter never exceeds the goal's
//! maximum; once it is reached, [`GoalTracker::should_continue`] reports
//! exhaustion regardless of task state.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::GoalError;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const WORKING_MEMORY_CAPACITY: usize = 20;

/// Memory entries included in the iteration context.
const CONTEXT_MEMORY_ENTRIES: usize = 5;
/// Characters of a task result/error included in the iteration context.
const CONTEXT_DETAIL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    fn icon(self) -> &'static str {
        match self {
            TaskStatus::Pending => "⏳",
            TaskStatus::InProgress => "🔄",
            TaskStatus::Completed => "✅",
            TaskStatus::Failed => "❌",
            TaskStatus::Blocked => "🚫",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub iteration_created: u32,
}

/// Ring buffer of the model's working notes; the oldest entry is evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingMemory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .skip(self.entries.len().saturating_sub(count))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub description: String,
    pub tasks: Vec<Task>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub memory: WorkingMemory,
    pub status: GoalStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Goal {
    fn new(description: String, max_iterations: u32, now: DateTime<Utc>) -> Self {
        Self {
            description,
            tasks: Vec::new(),
            iteration: 0,
            max_iterations,
            memory: WorkingMemory::new(WORKING_MEMORY_CAPACITY),
            status: GoalStatus::Pending,
            started_at: now,
            finished_at: None,
        }
    }

    /// A goal with no tasks is not complete.
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|task| task.status == TaskStatus::Completed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// `(completed, total)` task counts.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        (completed, self.tasks.len())
    }
}

/// Why iteration stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoActiveGoal,
    Completed,
    IterationsExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NoActiveGoal => f.write_str("no active goal"),
            StopReason::Completed => f.write_str("completed"),
            StopReason::IterationsExhausted => f.write_str("iterations exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop(StopReason),
}

/// Single-goal-at-a-time tracker.
#[derive(Debug, Clone)]
pub struct GoalTracker {
    max_iterations: u32,
    active: Option<Goal>,
    history: Vec<Goal>,
}

impl Default for GoalTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl GoalTracker {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            active: None,
            history: Vec::new(),
        }
    }

    pub fn active(&self) -> Option<&Goal> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &[Goal] {
        &self.history
    }

    /// Start tracking a goal. Rejects the request while another goal is active.
    pub fn create_goal(
        &mut self,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<&Goal, GoalError> {
        if let Some(goal) = &self.active {
            return Err(GoalError::AlreadyActive(goal.description.clone()));
        }
        let goal = Goal::new(description.into(), self.max_iterations, now);
        Ok(&*self.active.insert(goal))
    }

    pub fn should_continue(&self) -> Continuation {
        let Some(goal) = &self.active else {
            return Continuation::Stop(StopReason::NoActiveGoal);
        };
        if goal.is_complete() {
            return Continuation::Stop(StopReason::Completed);
        }
        if goal.is_exhausted() {
            return Continuation::Stop(StopReason::IterationsExhausted);
        }
        Continuation::Continue
    }

    /// Advance the iteration counter, saturating at the goal's maximum.
    pub fn increment_iteration(&mut self) -> Result<u32, GoalError> {
        let goal = self.active.as_mut().ok_or(GoalError::NoActiveGoal)?;
        goal.status = GoalStatus::InProgress;
        if goal.iteration < goal.max_iterations {
            goal.iteration += 1;
        }
        Ok(goal.iteration)
    }

    /// Append a task created in the current iteration; returns its index.
    pub fn add_task(
        &mut self,
        description: impl Into<String>,
        status: TaskStatus,
    ) -> Result<usize, GoalError> {
        let goal = self.active.as_mut().ok_or(GoalError::NoActiveGoal)?;
        goal.tasks.push(Task {
            description: description.into(),
            status,
            result: None,
            error: None,
            iteration_created: goal.iteration,
        });
        Ok(goal.tasks.len() - 1)
    }

    pub fn update_task(
        &mut self,
        index: usize,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), GoalError> {
        let goal = self.active.as_mut().ok_or(GoalError::NoActiveGoal)?;
        let task = goal
            .tasks
            .get_mut(index)
            .ok_or(GoalError::UnknownTask(index))?;
        task.status = status;
        if result.is_some() {
            task.result = result;
        }
        if error.is_some() {
            task.error = error;
        }
        Ok(())
    }

    pub fn add_memory(&mut self, entry: impl Into<String>) -> Result<(), GoalError> {
        let goal = self.active.as_mut().ok_or(GoalError::NoActiveGoal)?;
        goal.memory.push(entry);
        Ok(())
    }

    /// Finish the active goal and archive it.
    pub fn complete_goal(&mut self, success: bool, now: DateTime<Utc>) -> Result<&Goal, GoalError> {
        let mut goal = self.active.take().ok_or(GoalError::NoActiveGoal)?;
        goal.status = if success {
            GoalStatus::Completed
        } else {
            GoalStatus::Failed
        };
        goal.finished_at = Some(now);
        self.history.push(goal);
        Ok(&self.history[self.history.len() - 1])
    }

    /// Progress block sent back to the model with each continuation query.
    pub fn iteration_context(&self) -> String {
        let Some(goal) = &self.active else {
            return String::new();
        };
        let (completed, total) = goal.progress();
        let mut out = format!(
            "<current_goal>\nGoal: {}\nIteration: {}/{}\nProgress: {completed}/{total} tasks completed\n</current_goal>\n\n<tasks>\n",
            goal.description, goal.iteration, goal.max_iterations
        );
        for (index, task) in goal.tasks.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} {}\n",
                index + 1,
                task.status.icon(),
                task.description
            ));
            if let Some(result) = &task.result {
                out.push_str(&format!("   Result: {}\n", truncate(result)));
            }
            if let Some(error) = &task.error {
                out.push_str(&format!("   Error: {}\n", truncate(error)));
            }
        }
        out.push_str("</tasks>\n");

        if !goal.memory.is_empty() {
            out.push_str("\n<ai_memory>\n");
            for entry in goal.memory.recent(CONTEXT_MEMORY_ENTRIES) {
                out.push_str(&format!("- {entry}\n"));
            }
            out.push_str("</ai_memory>\n");
        }
        out
    }
}

/// Human-readable status block for a goal.
pub fn format_status(goal: &Goal) -> String {
    let (completed, total) = goal.progress();
    let percent = if total == 0 {
        0
    } else {
        completed * 100 / total
    };
    let mut out = format!(
        "📋 Goal: {}\n🔄 Iteration: {}/{}\n📊 Progress: {completed}/{total} tasks ({percent}%)\n\nTasks:\n",
        goal.description, goal.iteration, goal.max_iterations
    );
    for (index, task) in goal.tasks.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {} {}\n",
            index + 1,
            task.status.icon(),
            task.description
        ));
    }
    out.trim_end().to_string()
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= CONTEXT_DETAIL_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(CONTEXT_DETAIL_CHARS).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn second_goal_is_rejected_while_one_is_active() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("deploy nginx", now()).expect("create");
        assert_eq!(
            tracker.create_goal("other", now()).unwrap_err(),
            GoalError::AlreadyActive("deploy nginx".to_string())
        );
    }

    #[test]
    fn stops_after_exactly_max_increments_regardless_of_tasks() {
        let mut tracker = GoalTracker::new(10);
        tracker.create_goal("goal", now()).expect("create");
        tracker
            .add_task("pending forever", TaskStatus::Pending)
            .expect("task");
        for _ in 0..9 {
            tracker.increment_iteration().expect("increment");
            assert_eq!(tracker.should_continue(), Continuation::Continue);
        }
        tracker.increment_iteration().expect("increment");
        assert_eq!(
            tracker.should_continue(),
            Continuation::Stop(StopReason::IterationsExhausted)
        );
        // Saturates rather than exceeding the maximum.
        assert_eq!(tracker.increment_iteration(), Ok(10));
    }

    #[test]
    fn goal_without_tasks_is_not_complete() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("goal", now()).expect("create");
        assert_eq!(tracker.should_continue(), Continuation::Continue);
    }

    #[test]
    fn all_tasks_completed_stops_with_completed() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("goal", now()).expect("create");
        let index = tracker.add_task("step", TaskStatus::InProgress).expect("task");
        tracker
            .update_task(index, TaskStatus::Completed, Some("ok".to_string()), None)
            .expect("update");
        assert_eq!(
            tracker.should_continue(),
            Continuation::Stop(StopReason::Completed)
        );
    }

    #[test]
    fn unknown_task_index_is_an_error() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("goal", now()).expect("create");
        assert_eq!(
            tracker.update_task(3, TaskStatus::Failed, None, None),
            Err(GoalError::UnknownTask(3))
        );
    }

    #[test]
    fn working_memory_evicts_oldest_entry() {
        let mut memory = WorkingMemory::new(WORKING_MEMORY_CAPACITY);
        for index in 0..25 {
            memory.push(format!("note {index}"));
        }
        assert_eq!(memory.len(), 20);
        assert_eq!(memory.recent(1).collect::<Vec<_>>(), vec!["note 24"]);
        assert_eq!(memory.recent(20).next(), Some("note 5"));
    }

    #[test]
    fn complete_goal_archives_and_frees_active_slot() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("goal", now()).expect("create");
        let archived = tracker.complete_goal(false, now()).expect("complete");
        assert_eq!(archived.status, GoalStatus::Failed);
        assert!(tracker.active().is_none());
        assert_eq!(tracker.history().len(), 1);
        tracker.create_goal("next", now()).expect("second goal allowed");
    }

    #[test]
    fn iteration_context_lists_tasks_and_recent_memory() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("set up logging", now()).expect("create");
        tracker.increment_iteration().expect("increment");
        let index = tracker.add_task("write config", TaskStatus::InProgress).expect("task");
        tracker
            .update_task(index, TaskStatus::Completed, Some("done".to_string()), None)
            .expect("update");
        for index in 0..7 {
            tracker.add_memory(format!("m{index}")).expect("memory");
        }
        let context = tracker.iteration_context();
        assert!(context.contains("Goal: set up logging"));
        assert!(context.contains("Iteration: 1/10"));
        assert!(context.contains("1. ✅ write config"));
        assert!(context.contains("   Result: done"));
        assert!(!context.contains("- m1\n"));
        assert!(context.contains("- m2\n"));
        assert!(context.contains("- m6\n"));
    }

    #[test]
    fn format_status_reports_progress() {
        let mut tracker = GoalTracker::default();
        tracker.create_goal("goal", now()).expect("create");
        tracker.add_task("a", TaskStatus::Completed).expect("task");
        tracker.add_task("b", TaskStatus::Failed).expect("task");
        let status = format_status(tracker.active().expect("active"));
        assert!(status.contains("📊 Progress: 1/2 tasks (50%)"));
        assert!(status.contains("  2. ❌ b"));
    }
}
