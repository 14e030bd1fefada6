//! Prompt templates sent to the completion service.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, warn};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TURN_TEMPLATE: &str = include_str!("prompts/turn.md");
const ALTERNATIVES_TEMPLATE: &str = include_str!("prompts/alternatives.md");
const OPTION_TEMPLATE: &str = include_str!("prompts/option.md");
const CLARIFY_TEMPLATE: &str = include_str!("prompts/clarify.md");
const GOAL_CONTINUE_TEMPLATE: &str = include_str!("prompts/goal_continue.md");

/// Output of a command that failed in the user's shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BashOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("turn", TURN_TEMPLATE)
            .expect("turn template should be valid");
        env.add_template("alternatives", ALTERNATIVES_TEMPLATE)
            .expect("alternatives template should be valid");
        env.add_template("option", OPTION_TEMPLATE)
            .expect("option template should be valid");
        env.add_template("clarify", CLARIFY_TEMPLATE)
            .expect("clarify template should be valid");
        env.add_template("goal_continue", GOAL_CONTINUE_TEMPLATE)
            .expect("goal_continue template should be valid");
        Self { env }
    }

    pub fn default_system_prompt(&self, max_iterations: u32) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(context! { max_iterations => max_iterations })?)
    }

    /// Wrap the (possibly enriched) user prompt for one turn.
    pub fn turn(&self, prompt: &str, bash: Option<&BashOutcome>) -> Result<String> {
        let template = self.env.get_template("turn")?;
        Ok(template.render(context! { prompt => prompt.trim(), bash => bash })?)
    }

    pub fn alternatives(&self, failed: &[String]) -> Result<String> {
        let template = self.env.get_template("alternatives")?;
        Ok(template.render(context! { failed => failed })?)
    }

    pub fn option(&self, option: &str) -> Result<String> {
        let template = self.env.get_template("option")?;
        Ok(template.render(context! { option => option })?)
    }

    pub fn clarify(&self, previous: &str) -> Result<String> {
        let template = self.env.get_template("clarify")?;
        Ok(template.render(context! { previous => previous.trim() })?)
    }

    pub fn goal_continue(&self, iteration_context: &str, last_output: &str) -> Result<String> {
        let template = self.env.get_template("goal_continue")?;
        Ok(template.render(context! {
            iteration_context => iteration_context.trim(),
            last_output => last_output.trim(),
        })?)
    }
}

/// System prompt from `path`, or the built-in default when the file is
/// missing, unreadable or blank.
pub fn load_system_prompt(
    engine: &PromptEngine,
    path: &Path,
    max_iterations: u32,
) -> Result<String> {
    match read_optional(path) {
        Ok(Some(custom)) => {
            debug!(path = %path.display(), "using custom system prompt");
            return Ok(custom);
        }
        Ok(None) => {}
        Err(err) => warn!(err = %format!("{err:#}"), "falling back to default system prompt"),
    }
    engine.default_system_prompt(max_iterations)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::MARKERS;

    #[test]
    fn default_system_prompt_documents_formats_and_markers() {
        let prompt = PromptEngine::new().default_system_prompt(10).expect("render");
        assert!(prompt.contains("awesh: <command>"));
        assert!(prompt.contains("```edit:path/to/file"));
        assert!(prompt.contains("<<<<<<< OLD"));
        assert!(prompt.contains("up to 10 iterations"));
        for (marker, _) in MARKERS {
            assert!(prompt.contains(marker), "missing {marker}");
        }
    }

    #[test]
    fn alternatives_lists_failed_commands() {
        let prompt = PromptEngine::new()
            .alternatives(&["ls /nope".to_string(), "cat missing".to_string()])
            .expect("render");
        assert!(
            prompt.starts_with("The following commands failed:\n- ls /nope\n- cat missing\n\n")
        );
        assert!(prompt.ends_with("awesh: <command>"));
    }

    #[test]
    fn turn_includes_bash_result_only_when_present() {
        let engine = PromptEngine::new();
        let plain = engine.turn("list files", None).expect("render");
        assert!(plain.starts_with("list files\n"));
        assert!(!plain.contains("Bash result"));

        let bash = BashOutcome {
            exit_code: 127,
            stdout: String::new(),
            stderr: "gti: command not found".to_string(),
        };
        let failed = engine.turn("gti status", Some(&bash)).expect("render");
        assert!(failed.starts_with("User command: gti status\nBash result:\n- Exit code: 127"));
        assert!(failed.contains("- Stderr: gti: command not found"));
    }

    #[test]
    fn custom_system_prompt_wins_over_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("system.txt");
        let engine = PromptEngine::new();

        let fallback = load_system_prompt(&engine, &path, 10).expect("default");
        assert!(fallback.contains("COMMAND MODE"));

        std::fs::write(&path, "  be terse  \n").expect("write");
        assert_eq!(load_system_prompt(&engine, &path, 10).expect("custom"), "be terse");
    }
}
