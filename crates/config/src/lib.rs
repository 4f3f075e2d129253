//! Configuration loading, validation, and management for twin.
//!
//! Loads configuration from `~/.twin/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use twin_core::provider::GenerationOptions;
use twin_core::session::Mode;

/// The root configuration structure.
///
/// Maps directly to `~/.twin/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model (name or alias)
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Mode the session starts in
    #[serde(default)]
    pub default_mode: Mode,

    /// Agent the session starts with
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// Pick the agent whose keywords match the first message
    #[serde(default)]
    pub auto_select_agent: bool,

    /// Short names for installed models, e.g. `fast = "qwen2.5-coder:7b"`
    #[serde(default = "default_model_aliases")]
    pub model_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub agent: AgentLoopConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

fn default_model() -> String {
    "qwen2.5-coder:7b".into()
}
fn default_agent() -> String {
    "assistant".into()
}
fn default_model_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("fast".to_string(), "qwen2.5-coder:7b".to_string()),
        ("smart".to_string(), "qwen2.5-coder:32b".to_string()),
        ("vision".to_string(), "llava:7b".to_string()),
    ])
}

/// Sampling options sent with every backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Context window in tokens; also drives the compaction budget
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_num_ctx() -> u32 {
    8192
}
fn default_keep_alive() -> String {
    "5m".into()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_ctx: default_num_ctx(),
            keep_alive: default_keep_alive(),
        }
    }
}

impl GenerationConfig {
    pub fn to_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            num_ctx: self.num_ctx,
            keep_alive: self.keep_alive.clone(),
        }
    }
}

/// How to reach the model backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama HTTP API
    #[default]
    Http,
    /// `ollama run` subprocess
    Cli,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Executable used when `kind = "cli"`
    #[serde(default = "default_backend_binary")]
    pub binary: String,

    /// How often a running call checks for cancellation
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time allowed between terminate and force-kill
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Optional hard limit on a single backend call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_backend_url() -> String {
    "http://localhost:11434".into()
}
fn default_backend_binary() -> String {
    "ollama".into()
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_cancel_grace_ms() -> u64 {
    2000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: default_backend_url(),
            binary: default_backend_binary(),
            poll_interval_ms: default_poll_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            request_timeout_secs: None,
        }
    }
}

/// Conversation budget and compaction tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Characters assumed per token when sizing the budget
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// Fraction of the budget that triggers compaction
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Most recent dynamic messages never summarized
    #[serde(default = "default_protect_recent")]
    pub protect_recent: usize,

    #[serde(default = "default_bullet_max_chars")]
    pub bullet_max_chars: usize,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Number of previous sessions quoted in the system prompt
    #[serde(default = "default_previous_sessions")]
    pub previous_sessions: usize,
}

fn default_chars_per_token() -> f64 {
    4.0
}
fn default_threshold() -> f64 {
    0.7
}
fn default_protect_recent() -> usize {
    6
}
fn default_bullet_max_chars() -> usize {
    240
}
fn default_summary_max_chars() -> usize {
    2000
}
fn default_previous_sessions() -> usize {
    2
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            threshold: default_threshold(),
            protect_recent: default_protect_recent(),
            bullet_max_chars: default_bullet_max_chars(),
            summary_max_chars: default_summary_max_chars(),
            previous_sessions: default_previous_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_bash_timeout_secs")]
    pub bash_timeout_secs: u64,

    #[serde(default = "default_read_max_lines")]
    pub read_max_lines: usize,

    #[serde(default = "default_dir_max_entries")]
    pub dir_max_entries: usize,

    /// Base URL of a fetch-and-extract proxy (`GET {proxy}/fetch?url=`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_fetch_proxy: Option<String>,

    #[serde(default = "default_web_fetch_max_chars")]
    pub web_fetch_max_chars: usize,

    #[serde(default = "default_web_fetch_timeout_secs")]
    pub web_fetch_timeout_secs: u64,
}

fn default_bash_timeout_secs() -> u64 {
    120
}
fn default_read_max_lines() -> usize {
    2000
}
fn default_dir_max_entries() -> usize {
    200
}
fn default_web_fetch_max_chars() -> usize {
    25_000
}
fn default_web_fetch_timeout_secs() -> u64 {
    20
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash_timeout_secs: default_bash_timeout_secs(),
            read_max_lines: default_read_max_lines(),
            dir_max_entries: default_dir_max_entries(),
            web_fetch_proxy: None,
            web_fetch_max_chars: default_web_fetch_max_chars(),
            web_fetch_timeout_secs: default_web_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Tool → follow-up rounds allowed within one turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

fn default_max_tool_rounds() -> u32 {
    5
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Per-directory context logs
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,

    /// Saved session snapshots
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// Agent definitions (`<name>/MASTER_AGENT.md`, `<name>/CLAUDE.md`)
    #[serde(default = "default_agents_dir")]
    pub agents_dir: PathBuf,

    /// Source tree `improve_self` edits and commits
    #[serde(default = "default_self_dir")]
    pub self_dir: PathBuf,
}

fn default_context_dir() -> PathBuf {
    AppConfig::config_dir().join("context")
}
fn default_sessions_dir() -> PathBuf {
    AppConfig::config_dir().join("sessions")
}
fn default_agents_dir() -> PathBuf {
    AppConfig::config_dir().join("agents")
}
fn default_self_dir() -> PathBuf {
    // crates/config -> workspace root
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            context_dir: default_context_dir(),
            sessions_dir: default_sessions_dir(),
            agents_dir: default_agents_dir(),
            self_dir: default_self_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.twin/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `TWIN_MODEL`
    /// - `TWIN_OLLAMA_URL`
    /// - `TWIN_MODE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(model) = var("TWIN_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = var("TWIN_OLLAMA_URL") {
            self.backend.url = url;
        }
        if let Some(mode) = var("TWIN_MODE") {
            self.default_mode = mode.parse().map_err(ConfigError::ValidationError)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".twin")
    }

    /// Resolve an alias to a model name; unknown names pass through.
    pub fn resolve_model(&self, name: &str) -> String {
        self.model_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.temperature < 0.0 || self.generation.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.generation.top_p <= 0.0 || self.generation.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "generation.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.generation.num_ctx == 0 {
            return Err(ConfigError::ValidationError("generation.num_ctx must be > 0".into()));
        }

        if self.context.threshold <= 0.0 || self.context.threshold > 1.0 {
            return Err(ConfigError::ValidationError(
                "context.threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if self.context.chars_per_token <= 0.0 {
            return Err(ConfigError::ValidationError(
                "context.chars_per_token must be > 0".into(),
            ));
        }

        if self.tools.bash_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.bash_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `twin init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_mode: Mode::default(),
            default_agent: default_agent(),
            auto_select_agent: false,
            model_aliases: default_model_aliases(),
            generation: GenerationConfig::default(),
            backend: BackendConfig::default(),
            context: ContextConfig::default(),
            tools: ToolsConfig::default(),
            agent: AgentLoopConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
