//! Prompt enrichment with the contents of files the user mentions.
//!
//! Candidates come from filename-shaped words in the prompt. Only candidates
//! that resolve to readable text files under the size limit are attached, best
//! match first, within a total content budget.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::config::{FileAgentConfig, expand_home};

const SEARCH_DEPTH: usize = 3;
const SMALL_FILE_CHARS: usize = 2000;
const MEDIUM_FILE_CHARS: usize = 3000;

const COMMON_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "go", "rs", "c", "cpp", "h", "java", "rb", "php", "sh", "yml", "yaml",
    "json", "xml", "html", "css", "md", "txt", "log", "conf", "cfg", "ini", "env", "toml",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "bin", "exe", "dll", "so", "dylib", "o", "a", "lib", "jpg", "jpeg", "png", "gif", "bmp",
    "ico", "svg", "mp3", "mp4", "avi", "mov", "wmv", "flv", "webm", "pdf", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx", "zip", "tar", "gz", "bz2", "xz", "rar", "7z", "pyc", "pyo", "class",
    "jar", "war",
];

const STOP_WORDS: &[&str] = &[
    "about", "add", "build", "change", "check", "close", "create", "delete", "deploy", "edit",
    "file", "find", "fix", "install", "make", "modify", "open", "read", "remove", "run", "show",
    "start", "stop", "test", "update", "write",
];

static FILE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:~/|\.{0,2}/)?[\w\-./]*[\w\-]\.(?:py|js|ts|jsx|tsx|go|rs|c|cpp|h|hpp|java|rb|php|sh|bash|zsh|fish|yml|yaml|json|xml|html|css|scss|md|txt|log|conf|cfg|ini|env|toml|lock|mod)\b",
    )
    .expect("file reference pattern should be valid")
});

static PATH_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:~/|\.{0,2}/|\b[\w\-.]+/)[\w\-./]+").expect("path pattern should be valid")
});

static FILE_CREATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(create|write|make|generate|build)\s+.*\s+(file|program|script|code)",
        r"\b(write|create|make)\s+.*\s+as\s+\w+\.\w+",
        r"\b(generate|create)\s+.*\s+and\s+name\s+it",
        r"\bhello\s+world\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("file creation pattern should be valid"))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchQuality {
    /// Name found by walking the working directory.
    Partial,
    /// Relative to the working directory.
    Relative,
    /// The candidate as written.
    Exact,
}

impl MatchQuality {
    fn label(self) -> &'static str {
        match self {
            MatchQuality::Exact => "exact",
            MatchQuality::Relative => "relative",
            MatchQuality::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone)]
struct FileMatch {
    path: PathBuf,
    quality: MatchQuality,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct FileReferenceAgent {
    config: FileAgentConfig,
}

impl FileReferenceAgent {
    pub fn new(config: FileAgentConfig) -> Self {
        Self { config }
    }

    /// Return the prompt with attached file context and the files attached.
    /// The prompt comes back unchanged when nothing is attached.
    #[instrument(skip_all, fields(working_dir = %working_dir.display()))]
    pub fn enrich(&self, prompt: &str, working_dir: &Path) -> (String, Vec<PathBuf>) {
        if !self.config.enabled {
            return (prompt.to_string(), Vec::new());
        }
        if is_file_creation_request(prompt) {
            debug!("file creation request, not attaching files");
            return (prompt.to_string(), Vec::new());
        }

        let candidates = extract_candidates(prompt);
        if candidates.is_empty() {
            return (prompt.to_string(), Vec::new());
        }
        debug!(candidates = ?candidates, "file candidates");

        let matches = self.search(&candidates, working_dir);
        if matches.is_empty() {
            return (prompt.to_string(), Vec::new());
        }

        let mut sections = Vec::new();
        let mut attached = Vec::new();
        let mut budget = self.config.max_total_content;
        for found in &matches {
            if budget == 0 {
                break;
            }
            let Ok(bytes) = fs::read(&found.path) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let mut excerpt = excerpt(&text);
            let chars = excerpt.chars().count();
            if chars > budget {
                excerpt = excerpt.chars().take(budget).collect::<String>() + "\n... [truncated]";
            }
            budget = budget.saturating_sub(chars.min(budget));
            sections.push(format!(
                "=== FILE: {path} ===\nSize: {size} bytes ({lines} lines), match: {quality}\n\n{excerpt}\n=== END OF {path} ===\n",
                path = found.path.display(),
                size = found.size,
                lines = text.lines().count(),
                quality = found.quality.label(),
            ));
            attached.push(found.path.clone());
        }

        if sections.is_empty() {
            return (prompt.to_string(), Vec::new());
        }
        debug!(files = attached.len(), "attached file context");
        let enriched = format!(
            "FILE CONTEXT:\nThe following files are relevant to the user's request:\n\n{}\nUSER REQUEST:\n{}\n\nIf you provide commands, format them as:\nawesh: <command>",
            sections.join("\n"),
            prompt.trim()
        );
        (enriched, attached)
    }

    fn search(&self, candidates: &BTreeSet<String>, working_dir: &Path) -> Vec<FileMatch> {
        let mut found: Vec<FileMatch> = Vec::new();
        for candidate in candidates {
            let mut direct = Vec::new();
            let as_written = expand_home(Path::new(candidate));
            if as_written.is_absolute() {
                direct.push((as_written, MatchQuality::Exact));
            } else {
                direct.push((working_dir.join(&as_written), MatchQuality::Relative));
                if as_written.extension().is_none() {
                    for ext in COMMON_EXTENSIONS {
                        direct.push((
                            working_dir.join(format!("{candidate}.{ext}")),
                            MatchQuality::Relative,
                        ));
                    }
                }
            }

            let mut hits: Vec<FileMatch> = direct
                .into_iter()
                .filter_map(|(path, quality)| self.inspect(&path, quality))
                .collect();
            if hits.is_empty() {
                hits = self.walk_for(candidate, working_dir);
            }
            for hit in hits {
                match found.iter_mut().find(|existing| existing.path == hit.path) {
                    Some(existing) if existing.quality < hit.quality => *existing = hit,
                    Some(_) => {}
                    None => found.push(hit),
                }
            }
        }
        found.sort_by(|a, b| b.quality.cmp(&a.quality));
        found.truncate(self.config.max_files);
        found
    }

    fn walk_for(&self, candidate: &str, working_dir: &Path) -> Vec<FileMatch> {
        let Some(name) = Path::new(candidate).file_name().and_then(|name| name.to_str()) else {
            return Vec::new();
        };
        let stem = name.split('.').next().unwrap_or(name);
        if stem.len() < 3 {
            return Vec::new();
        }
        WalkDir::new(working_dir)
            .max_depth(SEARCH_DEPTH)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            })
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.file_name().to_string_lossy().starts_with(stem)
            })
            .filter_map(|entry| self.inspect(entry.path(), MatchQuality::Partial))
            .take(self.config.max_files)
            .collect()
    }

    fn inspect(&self, path: &Path, quality: MatchQuality) -> Option<FileMatch> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() || is_binary(path) {
            return None;
        }
        if metadata.len() > self.config.max_file_size {
            debug!(path = %path.display(), size = metadata.len(), "skipping large file");
            return None;
        }
        Some(FileMatch {
            path: path.to_path_buf(),
            quality,
            size: metadata.len(),
        })
    }
}

/// Requests to create a new file must not pull existing files into context.
pub fn is_file_creation_request(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    FILE_CREATION.iter().any(|pattern| pattern.is_match(&lower))
}

fn extract_candidates(prompt: &str) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    for found in FILE_REFERENCE.find_iter(prompt).chain(PATH_REFERENCE.find_iter(prompt)) {
        let candidate = found.as_str().trim_end_matches(['.', '/']);
        if !candidate.is_empty() {
            candidates.insert(candidate.to_string());
        }
    }
    for word in prompt.split_whitespace() {
        let clean: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
            .collect();
        let clean = clean.trim_end_matches(['.', '/']);
        if looks_like_filename(clean) {
            candidates.insert(clean.to_string());
        }
    }
    candidates
}

fn looks_like_filename(word: &str) -> bool {
    if word.len() < 2 || STOP_WORDS.contains(&word.to_lowercase().as_str()) {
        return false;
    }
    let has_extension = word
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
    has_extension || word.contains('/') || (word.len() > 6 && word.contains(['_', '-']))
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Whole small files; head, middle and tail of long ones.
fn excerpt(text: &str) -> String {
    if text.chars().count() <= SMALL_FILE_CHARS {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() > 100 {
        let middle_start = lines.len() / 2 - 5;
        return format!(
            "{}\n\n... [showing lines {}-{} of {}] ...\n{}\n\n... [showing last 10 lines] ...\n{}",
            lines[..20].join("\n"),
            middle_start + 1,
            middle_start + 10,
            lines.len(),
            lines[middle_start..middle_start + 10].join("\n"),
            lines[lines.len() - 10..].join("\n"),
        );
    }
    let mut head: String = text.chars().take(MEDIUM_FILE_CHARS).collect();
    if head.len() < text.len() {
        head.push_str("\n... [truncated]");
    }
    head
}
