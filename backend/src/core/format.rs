//! User-facing reply text.
//!
//! Every terminal failure starts with `❌`; model text passed through starts
//! with `🤖`.

use std::path::Path;

use crate::core::types::{EditResult, ExecutionResult};
use crate::error::ModelError;

const SCRIPT_EXTENSIONS: &[&str] = &["sh", "bash", "py", "rb", "pl", "js"];

pub fn informational(text: &str) -> String {
    format!("🤖 {}\n", text.trim())
}

pub fn failure(message: &str) -> String {
    format!("❌ {}\n", message.trim_end())
}

pub fn command_success(result: &ExecutionResult) -> String {
    let output = if result.stdout.trim().is_empty() {
        "Command executed successfully"
    } else {
        result.stdout.as_str()
    };
    format!("✅ {}\n{output}", result.command)
}

/// Every command failed and the single alternatives query returned no commands.
pub fn commands_exhausted(failed: &[String], alternative_text: &str) -> String {
    format!(
        "❌ All commands failed and no alternatives provided:\n{}\n\n🤖 {}\n",
        bullet_list(failed),
        alternative_text.trim()
    )
}

/// Every command failed, including the alternatives round.
pub fn commands_failed(failed: &[String]) -> String {
    format!("❌ All commands failed:\n{}\n", bullet_list(failed))
}

pub fn options_exhausted(options: &[String]) -> String {
    format!("❌ All options failed:\n{}\n", bullet_list(options))
}

pub fn clarification_failed(original: &str) -> String {
    format!(
        "🤖 {}\n\n❌ Could not determine specific actions to take.\n",
        original.trim()
    )
}

/// Terminal reply for a turn whose completion could not be obtained.
pub fn model_failure(err: &ModelError) -> String {
    match err {
        ModelError::Unavailable(_) => failure("AI not ready yet - still loading models"),
        ModelError::Timeout(_) => failure("AI response timeout - request took too long"),
        ModelError::Empty => failure(
            "AI returned empty response twice - please check AI configuration or try again later",
        ),
        ModelError::Request(_) | ModelError::Stream(_) => failure(&format!("AI error: {err}")),
    }
}

pub fn edit_result(result: &EditResult) -> String {
    let icon = if result.success { "✅" } else { "❌" };
    format!("{icon} {}\n", result.message)
}

/// Summary of a batch of patch applications.
///
/// `scripts` lists the created files that should get run hints.
pub fn patch_summary(preamble: Option<&str>, results: &[EditResult], scripts: &[&Path]) -> String {
    let mut out = String::from("📝 File Edit Results:\n\n");
    for result in results {
        out.push_str(&edit_result(result));
        if let Some(backup) = &result.backup_path {
            out.push_str(&format!("   Backup: {}\n", backup.display()));
        }
    }

    let applied = results.iter().filter(|result| result.success).count();
    out.push_str(&format!(
        "\n📊 {applied}/{} edits applied successfully\n",
        results.len()
    ));

    if !scripts.is_empty() {
        out.push_str("\n➡️  Next steps:\n");
        for script in scripts {
            let name = script
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| script.display().to_string());
            out.push_str(&format!(
                "   • Run now: {} {name}\n   • Or make executable: chmod +x {name} && ./{name}\n",
                interpreter(script)
            ));
        }
    }

    match preamble.map(str::trim).filter(|text| !text.is_empty()) {
        Some(prose) => format!("🤖 {prose}\n\n{out}"),
        None => out,
    }
}

/// Whether newly written content looks like something the user will run.
pub fn is_script(path: &Path, content: &str) -> bool {
    content.starts_with("#!")
        || path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

fn interpreter(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("py") => "python3",
        Some("rb") => "ruby",
        Some("pl") => "perl",
        Some("js") => "node",
        Some("bash") => "bash",
        _ => "sh",
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
