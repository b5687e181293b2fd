//! Configuration loading, validation, and management for Forgehand.
//!
//! Loads configuration from `~/.forgehand/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.forgehand/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Phase budgets and event shaping
    #[serde(default)]
    pub agent: AgentConfig,

    /// Knowledge base, repository, and command policy
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Where the resumable task record lives
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// HTTP + WebSocket server
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Telegram bot
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- [provider] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Max output tokens per model call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

// --- [agent] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model calls allowed in one phase before a handoff
    #[serde(default = "default_max_turns")]
    pub max_turns_per_phase: u32,

    /// Cumulative input tokens that force a handoff
    #[serde(default = "default_token_ceiling")]
    pub phase_token_ceiling: u64,

    /// Interval between heartbeat events while a tool runs
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Max characters of a tool result shown in `tool_done`
    #[serde(default = "default_preview_chars")]
    pub result_preview_chars: usize,

    /// Replaces the built-in system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_max_turns() -> u32 {
    40
}
fn default_token_ceiling() -> u64 {
    160_000
}
fn default_heartbeat_secs() -> u64 {
    10
}
fn default_preview_chars() -> usize {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns_per_phase: default_max_turns(),
            phase_token_ceiling: default_token_ceiling(),
            heartbeat_secs: default_heartbeat_secs(),
            result_preview_chars: default_preview_chars(),
            system_prompt_override: None,
        }
    }
}

// --- [workspace] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Read-only knowledge base root
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,

    /// Read/write source repository root
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    /// First words `run_command` accepts
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Files larger than this are truncated by `read_file`
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: usize,

    #[serde(default = "default_git_remote")]
    pub git_remote: String,

    #[serde(default = "default_git_branch")]
    pub git_branch: String,
}

fn default_knowledge_dir() -> PathBuf {
    AppConfig::config_dir().join("knowledge")
}
fn default_repo_dir() -> PathBuf {
    AppConfig::config_dir().join("repo")
}
fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "find", "git", "cargo", "npm", "node",
        "python3", "make",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_command_timeout() -> u64 {
    120
}
fn default_max_read_bytes() -> usize {
    100_000
}
fn default_git_remote() -> String {
    "origin".into()
}
fn default_git_branch() -> String {
    "main".into()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: default_knowledge_dir(),
            repo_dir: default_repo_dir(),
            allowed_commands: default_allowed_commands(),
            command_timeout_secs: default_command_timeout(),
            max_read_bytes: default_max_read_bytes(),
            git_remote: default_git_remote(),
            git_branch: default_git_branch(),
        }
    }
}

// --- [checkpoint] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// "file" or "memory"
    #[serde(default = "default_checkpoint_backend")]
    pub backend: String,

    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

fn default_checkpoint_backend() -> String {
    "file".into()
}
fn default_checkpoint_path() -> PathBuf {
    AppConfig::config_dir().join("checkpoint.json")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            path: default_checkpoint_path(),
        }
    }
}

// --- rate limits ---

/// A fixed-window ceiling: `max_attempts` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl LimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_login_limit() -> LimitConfig {
    LimitConfig {
        max_attempts: 5,
        window_secs: 900,
    }
}
fn default_message_limit() -> LimitConfig {
    LimitConfig {
        max_attempts: 10,
        window_secs: 60,
    }
}

// --- [gateway] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Login password. When unset, `/ws` accepts connections without a token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_login_limit")]
    pub login_limit: LimitConfig,

    #[serde(default = "default_message_limit")]
    pub message_limit: LimitConfig,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            password: None,
            login_limit: default_login_limit(),
            message_limit: default_message_limit(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("password", &redact(&self.password))
            .field("login_limit", &self.login_limit)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

// --- [telegram] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// User ids or usernames; `*` allows everyone, empty allows no one.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll timeout for `getUpdates`
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Minimum gap between two edits of the same message
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,

    /// Characters per Telegram message before a new page starts
    #[serde(default = "default_page_chars")]
    pub page_chars: usize,

    /// Send the reply with Markdown formatting
    #[serde(default = "default_true")]
    pub markdown: bool,

    #[serde(default = "default_message_limit")]
    pub message_limit: LimitConfig,
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_edit_interval_ms() -> u64 {
    1200
}
fn default_page_chars() -> usize {
    4000
}

/// Telegram rejects messages longer than this.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

impl TelegramConfig {
    /// Whether a sender may talk to the bot, matched by numeric id or username.
    pub fn is_allowed(&self, user_id: &str, username: Option<&str>) -> bool {
        if self.allowed_users.iter().any(|u| u == "*") {
            return true;
        }
        self.allowed_users.iter().any(|u| {
            let u = u.trim_start_matches('@');
            u == user_id || username.is_some_and(|name| name.eq_ignore_ascii_case(u))
        })
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            allowed_users: Vec::new(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
            edit_interval_ms: default_edit_interval_ms(),
            page_chars: default_page_chars(),
            markdown: true,
            message_limit: default_message_limit(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_users", &self.allowed_users)
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("edit_interval_ms", &self.edit_interval_ms)
            .field("page_chars", &self.page_chars)
            .field("markdown", &self.markdown)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.forgehand/config.toml).
    ///
    /// Environment variables override the file:
    /// - `FORGEHAND_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `FORGEHAND_MODEL`
    /// - `FORGEHAND_PASSWORD`
    /// - `TELEGRAM_BOT_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup` (highest priority).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FORGEHAND_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = lookup("FORGEHAND_MODEL") {
            self.provider.model = model;
        }
        if let Some(password) = lookup("FORGEHAND_PASSWORD") {
            self.gateway.password = Some(password);
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgehand")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.provider.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "provider.max_tokens must be > 0".into(),
            ));
        }
        if self.agent.max_turns_per_phase == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns_per_phase must be > 0".into(),
            ));
        }
        if self.agent.heartbeat_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.heartbeat_secs must be > 0".into(),
            ));
        }
        if !matches!(self.checkpoint.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "checkpoint.backend must be \"file\" or \"memory\", got \"{}\"",
                self.checkpoint.backend
            )));
        }
        if self.telegram.page_chars == 0 || self.telegram.page_chars > TELEGRAM_MAX_MESSAGE_CHARS {
            return Err(ConfigError::ValidationError(format!(
                "telegram.page_chars must be between 1 and {TELEGRAM_MAX_MESSAGE_CHARS}"
            )));
        }
        for (name, limit) in [
            ("gateway.login_limit", &self.gateway.login_limit),
            ("gateway.message_limit", &self.gateway.message_limit),
            ("telegram.message_limit", &self.telegram.message_limit),
        ] {
            if limit.max_attempts == 0 || limit.window_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} needs max_attempts > 0 and window_secs > 0"
                )));
            }
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
