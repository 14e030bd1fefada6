//! Deterministic classification of completion text.
//!
//! Priority order: patch blocks, then prefixed commands, then
//! question/option heuristics, then plain informational text.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::edit_block::parse_edit_blocks;
use crate::core::types::{ActionItem, Classification, IterationMarker, Mode};

/// Marker that introduces an executable command line.
pub const COMMAND_PREFIX: &str = "awesh:";

const SHELL_METACHARS: &[char] = &['/', '|', '&', ';', '(', ')', '{', '}', '$', '`'];

pub const MARKERS: &[(&str, IterationMarker)] = &[
    ("GOAL_COMPLETE", IterationMarker::GoalComplete),
    ("CONTINUE_ITERATION", IterationMarker::ContinueIteration),
    ("NEED_USER_INPUT", IterationMarker::NeedUserInput),
];

static QUESTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\?",
        r"(?i)which.*do you want",
        r"(?i)do you want to",
        r"(?i)would you like to",
        r"(?i)please specify",
        r"(?i)could you clarify",
        r"(?i)what.*do you mean",
        r"(?i)here are.*options?:",
        r"(?i)choose from",
        r"(?i)select.*option",
        r"\d+\.\s",
        r"(?m)^\s*[a-zA-Z]\)\s",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("question pattern should be valid"))
    .collect()
});

static NUMBERED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)\d{1,2}\.\s+").expect("numbered marker pattern should be valid")
});

static LETTERED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)[a-zA-Z]\)\s+").expect("lettered marker pattern should be valid")
});

/// Classify a completion into its mode and ordered action items.
pub fn classify(text: &str) -> Classification {
    let cleaned = clean_thinking(text);

    let edits = parse_edit_blocks(&cleaned);
    if !edits.is_empty() {
        return Classification {
            mode: Mode::PatchEdit,
            items: edits.into_iter().map(ActionItem::PatchBlock).collect(),
            options: Vec::new(),
            cleaned,
        };
    }

    let commands = extract_commands(&cleaned);
    if !commands.is_empty() {
        return Classification {
            mode: Mode::CommandMode,
            items: commands
                .into_iter()
                .map(|text| ActionItem::Command { text })
                .collect(),
            options: Vec::new(),
            cleaned,
        };
    }

    if looks_like_question(&cleaned) {
        return Classification {
            mode: Mode::Disambiguation,
            items: Vec::new(),
            options: extract_options(&cleaned),
            cleaned,
        };
    }

    Classification {
        mode: Mode::Informational,
        items: Vec::new(),
        options: Vec::new(),
        cleaned,
    }
}

/// Drop a reasoning preamble that ends with a "done thinking" marker.
pub fn clean_thinking(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lowered = text.to_ascii_lowercase();
    match lowered.rfind("done thinking") {
        Some(pos) => {
            let rest = &text[pos + "done thinking".len()..];
            rest.strip_prefix('.').unwrap_or(rest).trim().to_string()
        }
        None => text.to_string(),
    }
}

/// Prefixed command lines outside code fences, in textual order.
///
/// A command needs at least two tokens or a shell metacharacter; a single bare
/// word after the prefix is treated as prose.
pub fn extract_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || stripped.starts_with('#') {
            continue;
        }
        let Some(rest) = stripped.strip_prefix(COMMAND_PREFIX) else {
            continue;
        };
        let command = rest.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        if command.split_whitespace().count() >= 2 || command.contains(SHELL_METACHARS) {
            commands.push(command.to_string());
        }
    }

    commands
}

fn looks_like_question(text: &str) -> bool {
    QUESTION_PATTERNS.iter().any(|pattern| pattern.is_match(text))
}

/// Candidate options from numbered (`1.`) or, failing that, lettered (`a)`)
/// list markers, including several markers on one line.
pub fn extract_options(text: &str) -> Vec<String> {
    let numbered = split_on_markers(text, &NUMBERED_MARKER);
    if !numbered.is_empty() {
        return numbered;
    }
    split_on_markers(text, &LETTERED_MARKER)
}

fn split_on_markers(text: &str, marker: &Regex) -> Vec<String> {
    let mut options = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let matches: Vec<_> = marker.find_iter(line).collect();
        for (index, found) in matches.iter().enumerate() {
            let end = matches
                .get(index + 1)
                .map_or(line.len(), |next| next.start());
            let option = line[found.end()..end].trim();
            if !option.is_empty() {
                options.push(option.to_string());
            }
        }
    }

    options
}

/// The last loop-control marker present in the text, if any.
pub fn iteration_marker(text: &str) -> Option<IterationMarker> {
    MARKERS
        .iter()
        .filter_map(|(token, marker)| text.rfind(token).map(|pos| (pos, *marker)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, marker)| marker)
}

/// Remove loop-control markers so they never reach a command or the user.
///
/// A line left with nothing but an emoji or bullet after removal is dropped.
pub fn strip_markers(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            if !MARKERS.iter().any(|(token, _)| line.contains(token)) {
                return Some(line.to_string());
            }
            let mut rest = line.to_string();
            for (token, _) in MARKERS {
                rest = rest.replace(token, "");
            }
            rest.chars()
                .any(char::is_alphanumeric)
                .then(|| rest.trim_end().to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
