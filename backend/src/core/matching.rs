//! Search/replace matching for file patches.
//!
//! An exact substring match is tried first. When the old content does not
//! occur verbatim, both sides are whitespace-normalized (runs of spaces/tabs
//! collapsed to one space, trailing whitespace stripped per line) and the
//! normalized match is mapped back onto the original byte range, so only the
//! matched region is rewritten.

/// How the old content was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Normalized,
}

/// Content after replacing the first match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub content: String,
    pub kind: MatchKind,
    /// Non-overlapping occurrences found (only the first is replaced).
    pub occurrences: usize,
}

/// Replace the first occurrence of `old` in `content` with `new`.
///
/// Returns `None` when `old` is empty or cannot be found even after
/// normalization.
pub fn replace_first(content: &str, old: &str, new: &str) -> Option<Replaced> {
    if old.is_empty() {
        return None;
    }

    if let Some(start) = content.find(old) {
        return Some(Replaced {
            content: splice(content, start, start + old.len(), new),
            kind: MatchKind::Exact,
            occurrences: content.matches(old).count(),
        });
    }

    let needle = normalize(old).text;
    if needle.is_empty() {
        return None;
    }
    let haystack = normalize(content);
    let start = haystack.text.find(&needle)?;
    let end = start + needle.len();

    let original_start = haystack.starts[start];
    let original_end = haystack.ends[end - 1];
    Some(Replaced {
        content: splice(content, original_start, original_end, new),
        kind: MatchKind::Normalized,
        occurrences: haystack.text.matches(needle.as_str()).count(),
    })
}

/// Whitespace-normalized text with a byte map back to the source.
struct Normalized {
    text: String,
    /// For each byte of `text`, the source offset where its origin begins.
    starts: Vec<usize>,
    /// For each byte of `text`, the source offset just past its origin.
    ends: Vec<usize>,
}

impl Normalized {
    fn push(&mut self, ch: char, start: usize, end: usize) {
        self.text.push(ch);
        for _ in 0..ch.len_utf8() {
            self.starts.push(start);
            self.ends.push(end);
        }
    }
}

fn normalize(source: &str) -> Normalized {
    let mut out = Normalized {
        text: String::with_capacity(source.len()),
        starts: Vec::with_capacity(source.len()),
        ends: Vec::with_capacity(source.len()),
    };

    let mut line_start = 0;
    for (index, line) in source.split('\n').enumerate() {
        if index > 0 {
            // The separator sits just before this line.
            out.push('\n', line_start - 1, line_start);
        }
        let kept = line.trim_end();
        let mut run: Option<(usize, usize)> = None;
        for (offset, ch) in kept.char_indices() {
            let at = line_start + offset;
            if ch == ' ' || ch == '\t' {
                run = Some(match run {
                    Some((run_start, _)) => (run_start, at + 1),
                    None => (at, at + 1),
                });
                continue;
            }
            if let Some((run_start, run_end)) = run.take() {
                out.push(' ', run_start, run_end);
            }
            out.push(ch, at, at + ch.len_utf8());
        }
        line_start += line.len() + 1;
    }

    out
}

fn splice(content: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut result = String::with_capacity(content.len() - (end - start) + replacement.len());
    result.push_str(&content[..start]);
    result.push_str(replacement);
    result.push_str(&content[end..]);
    result
}
