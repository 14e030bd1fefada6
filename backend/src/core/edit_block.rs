//! Parsing of patch blocks embedded in completion text.
//!
//! Two formats are recognized, in textual order:
//!
//! ````text
//! ```edit:path/to/file
//! <<<<<<< OLD
//! old lines
//! =======
//! new lines
//! >>>>>>> NEW
//! ```
//! ````
//!
//! and the simplified form:
//!
//! ```text
//! EDIT: path/to/file
//! OLD: old content (inline or on following lines)
//! NEW: new content (inline or on following lines)
//! ```
//!
//! Malformed blocks are skipped, never partially returned.

use crate::core::types::FileEdit;

const FENCE: &str = "```";
const FENCED_TAG: &str = "```edit:";
const OLD_MARKER: &str = "<<<<<<< OLD";
const SEPARATOR: &str = "=======";
const NEW_MARKER: &str = ">>>>>>> NEW";

/// Extract every well-formed patch block, in textual order.
pub fn parse_edit_blocks(text: &str) -> Vec<FileEdit> {
    scan(text).0
}

/// Prose preceding the first patch block, if any.
pub fn preamble(text: &str) -> Option<String> {
    let (_, first_line) = scan(text);
    let first_line = first_line?;
    let prose = text
        .lines()
        .take(first_line)
        .collect::<Vec<_>>()
        .join("\n");
    let prose = prose.trim();
    (!prose.is_empty()).then(|| prose.to_string())
}

fn scan(text: &str) -> (Vec<FileEdit>, Option<usize>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut edits = Vec::new();
    let mut first_line = None;
    let mut index = 0;

    while index < lines.len() {
        let parsed = if lines[index].trim_start().starts_with(FENCED_TAG) {
            parse_fenced(&lines, index)
        } else if lines[index].trim_start().starts_with("EDIT:") {
            parse_simplified(&lines, index)
        } else {
            None
        };

        match parsed {
            Some((edit, next)) => {
                first_line.get_or_insert(index);
                edits.push(edit);
                index = next;
            }
            None => index += 1,
        }
    }

    (edits, first_line)
}

/// Returns the edit and the index of the first line after the block.
fn parse_fenced(lines: &[&str], start: usize) -> Option<(FileEdit, usize)> {
    let path = lines[start].trim().strip_prefix(FENCED_TAG)?.trim();
    if path.is_empty() {
        return None;
    }
    if lines.get(start + 1)?.trim() != OLD_MARKER {
        return None;
    }

    let old_start = start + 2;
    let separator = find_line(lines, old_start, |line| line.trim() == SEPARATOR)?;
    let new_start = separator + 1;
    let new_end = find_line(lines, new_start, |line| line.trim() == NEW_MARKER)?;
    if lines.get(new_end + 1)?.trim() != FENCE {
        return None;
    }

    let edit = FileEdit {
        file_path: path.to_string(),
        old_content: lines[old_start..separator].join("\n"),
        new_content: lines[new_start..new_end].join("\n"),
    };
    Some((edit, new_end + 2))
}

fn parse_simplified(lines: &[&str], start: usize) -> Option<(FileEdit, usize)> {
    let path = lines[start].trim().strip_prefix("EDIT:")?.trim();
    if path.is_empty() {
        return None;
    }
    let old_line = lines.get(start + 1)?.trim_start();
    let old_inline = old_line.strip_prefix("OLD:")?;

    let new_index = find_line(lines, start + 2, |line| {
        let line = line.trim_start();
        line.starts_with("NEW:") || line.starts_with("EDIT:")
    })?;
    let new_inline = lines[new_index].trim_start().strip_prefix("NEW:")?;

    let end = find_line(lines, new_index + 1, |line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("EDIT:") || trimmed.starts_with(FENCED_TAG) || line.trim() == FENCE
    })
    .unwrap_or(lines.len());

    let edit = FileEdit {
        file_path: path.to_string(),
        old_content: section(old_inline, &lines[start + 2..new_index]),
        new_content: section(new_inline, &lines[new_index + 1..end]),
    };
    Some((edit, end))
}

fn section(inline: &str, following: &[&str]) -> String {
    let mut parts = Vec::with_capacity(following.len() + 1);
    if !inline.trim().is_empty() {
        parts.push(inline.trim());
    }
    parts.extend(following.iter().copied());
    parts.join("\n").trim().to_string()
}

fn find_line(lines: &[&str], from: usize, pred: impl Fn(&str) -> bool) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, line)| pred(line))
        .map(|(index, _)| index)
}
