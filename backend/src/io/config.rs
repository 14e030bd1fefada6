//! Backend configuration stored at `~/.config/awesh/backend.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Completion providers the backend knows how to reach.
pub const PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "perplexity"];

/// Backend configuration (TOML).
///
/// Every section defaults independently, so a partial file is valid. Missing
/// fields take the values the frontend has always assumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Append every executed command to the JSONL audit log.
    pub audit_log_enabled: bool,

    /// Start with debug logging enabled.
    pub verbose: bool,

    pub model: ModelConfig,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
    pub file_agent: FileAgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// One of [`PROVIDERS`].
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request server-sent-event streaming from the provider.
    pub streaming: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            streaming: true,
        }
    }
}

/// Filesystem locations. A leading `~` is expanded with [`expand_home`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub socket: PathBuf,
    pub backup_dir: PathBuf,
    pub system_prompt: PathBuf,
    pub audit_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("~/.awesh.sock"),
            backup_dir: PathBuf::from("~/.awesh_backups"),
            system_prompt: PathBuf::from("~/.awesh_system.txt"),
            audit_log: PathBuf::from("~/.awesh_audit.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Budget for one command run through the execution boundary.
    pub command_timeout_secs: u64,

    /// Budget for collecting one full completion.
    pub completion_timeout_secs: u64,

    /// Delay before the single automatic re-query after an empty completion.
    pub empty_retry_delay_ms: u64,

    /// Truncate command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Execution results kept per session before the oldest is evicted.
    pub history_capacity: usize,

    pub max_goal_iterations: u32,

    /// Longest accepted request line on the socket.
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            completion_timeout_secs: 300,
            empty_retry_delay_ms: 1000,
            output_limit_bytes: 100_000,
            history_capacity: 500,
            max_goal_iterations: 10,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl LimitsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn empty_retry_delay(&self) -> Duration {
        Duration::from_millis(self.empty_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileAgentConfig {
    pub enabled: bool,
    /// Files larger than this are never read.
    pub max_file_size: u64,
    /// Total bytes of file content added to one prompt.
    pub max_total_content: usize,
    pub max_files: usize,
}

impl Default for FileAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size: 50_000,
            max_total_content: 10_000,
            max_files: 5,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            audit_log_enabled: false,
            verbose: false,
            model: ModelConfig::default(),
            paths: PathsConfig::default(),
            limits: LimitsConfig::default(),
            file_agent: FileAgentConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if !PROVIDERS.contains(&self.model.provider.as_str()) {
            return Err(anyhow!(
                "model.provider must be one of {}, got {:?}",
                PROVIDERS.join(", "),
                self.model.provider
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.model.max_tokens == 0 {
            return Err(anyhow!("model.max_tokens must be > 0"));
        }
        if self.limits.command_timeout_secs == 0 {
            return Err(anyhow!("limits.command_timeout_secs must be > 0"));
        }
        if self.limits.completion_timeout_secs == 0 {
            return Err(anyhow!("limits.completion_timeout_secs must be > 0"));
        }
        if self.limits.output_limit_bytes == 0 {
            return Err(anyhow!("limits.output_limit_bytes must be > 0"));
        }
        if self.limits.history_capacity == 0 {
            return Err(anyhow!("limits.history_capacity must be > 0"));
        }
        if self.limits.max_goal_iterations == 0 {
            return Err(anyhow!("limits.max_goal_iterations must be > 0"));
        }
        if self.limits.max_message_bytes == 0 {
            return Err(anyhow!("limits.max_message_bytes must be > 0"));
        }
        Ok(())
    }

    /// Apply `MODEL`, `AI_PROVIDER`, `VERBOSE` and `FILE_AGENT_ENABLED`.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("MODEL").filter(|value| !value.trim().is_empty()) {
            self.model.model = model.trim().to_string();
        }
        if let Some(provider) = lookup("AI_PROVIDER").filter(|value| !value.trim().is_empty()) {
            self.model.provider = provider.trim().to_ascii_lowercase();
        }
        if let Some(verbose) = lookup("VERBOSE").as_deref().and_then(parse_flag) {
            self.verbose = verbose;
        }
        if let Some(enabled) = lookup("FILE_AGENT_ENABLED").as_deref().and_then(parse_flag) {
            self.file_agent.enabled = enabled;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// `~/.config/awesh/backend.toml`, if a home directory can be resolved.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("awesh").join("backend.toml"))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BackendConfig::default()`.
pub fn load_config(path: &Path) -> Result<BackendConfig> {
    if !path.exists() {
        let cfg = BackendConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BackendConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BackendConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
