//! Configuration loading, validation, and management for ironquill.
//!
//! Loads configuration from a TOML file (default `~/.ironquill/config.toml`)
//! with environment variable overrides for credentials. Every section has
//! serde defaults so an empty file yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Required configuration key missing: {0}")]
    KeyMissing(String),
}

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub trm: TrmConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// LLM provider selection and request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,

    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    #[serde(default = "default_fallback_provider")]
    pub fallback_provider: String,

    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Model id used for conversation summarization; same provider as
    /// primary. Empty disables the dedicated summarizer handle.
    #[serde(default = "default_summarizer_model")]
    pub summarizer_model: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_primary_provider() -> String {
    "anthropic".into()
}
fn default_primary_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_fallback_provider() -> String {
    "gemini".into()
}
fn default_fallback_model() -> String {
    "gemini-2.5-pro".into()
}
fn default_summarizer_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_max_retries() -> u32 {
    1
}
fn default_llm_timeout_ms() -> u64 {
    120_000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_provider: default_primary_provider(),
            primary_model: default_primary_model(),
            fallback_provider: default_fallback_provider(),
            fallback_model: default_fallback_model(),
            summarizer_model: default_summarizer_model(),
            max_retries: default_max_retries(),
            timeout_ms: default_llm_timeout_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Provider credentials. Loaded from the environment, never serialized
/// back out, and redacted from Debug output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<String>,
}

impl ApiKeys {
    /// Fill any unset keys from the environment.
    pub fn load_from_env(&mut self) {
        if self.anthropic.is_none() {
            self.anthropic = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if self.google.is_none() {
            self.google = std::env::var("GOOGLE_API_KEY").ok();
        }
    }
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("anthropic", &redact(&self.anthropic))
            .field("google", &redact(&self.google))
            .finish()
    }
}

/// Orchestrator behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Hard bound on LLM round-trips per user task.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Inject recommender suggestions into the system prompt.
    #[serde(default = "default_true")]
    pub use_trm_suggestions: bool,

    /// Kick off background training when the buffer has enough episodes.
    #[serde(default = "default_true")]
    pub auto_train: bool,
}

fn default_system_prompt() -> String {
    "You are a capable autonomous assistant. Use the available tools when they help, \
     and answer directly when they do not."
        .into()
}
fn default_max_turns() -> u32 {
    25
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            use_trm_suggestions: true,
            auto_train: true,
        }
    }
}

/// Persistent memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    #[serde(default = "default_max_episodes")]
    pub max_episodes: usize,

    /// Auto-checkpoint every N appended messages.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[serde(default = "default_true")]
    pub auto_checkpoint: bool,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.ironquill/storage")
}
fn default_max_episodes() -> usize {
    10_000
}
fn default_checkpoint_interval() -> u64 {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            max_episodes: default_max_episodes(),
            checkpoint_interval: default_checkpoint_interval(),
            auto_checkpoint: true,
        }
    }
}

/// Context window budgeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,

    /// Conversation turns kept raw (each turn ≈ user + assistant pair).
    #[serde(default = "default_keep_raw_turns")]
    pub keep_raw_turns: usize,

    /// Messages summarized per compaction batch.
    #[serde(default = "default_summarize_batch")]
    pub summarize_batch: usize,

    #[serde(default = "default_reserved_for_response")]
    pub reserved_for_response: usize,
}

fn default_context_max_tokens() -> usize {
    180_000
}
fn default_compaction_threshold() -> usize {
    150_000
}
fn default_keep_raw_turns() -> usize {
    10
}
fn default_summarize_batch() -> usize {
    21
}
fn default_reserved_for_response() -> usize {
    30_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_max_tokens(),
            compaction_threshold: default_compaction_threshold(),
            keep_raw_turns: default_keep_raw_turns(),
            summarize_batch: default_summarize_batch(),
            reserved_for_response: default_reserved_for_response(),
        }
    }
}

/// Loss weights for the recommender's self-supervised objectives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossWeights {
    #[serde(default = "default_w_contrastive")]
    pub contrastive: f32,
    #[serde(default = "default_w_next_action")]
    pub next_action: f32,
    #[serde(default = "default_w_outcome")]
    pub outcome: f32,
    #[serde(default = "default_w_masked")]
    pub masked: f32,
}

fn default_w_contrastive() -> f32 {
    1.0
}
fn default_w_next_action() -> f32 {
    0.5
}
fn default_w_outcome() -> f32 {
    0.3
}
fn default_w_masked() -> f32 {
    0.2
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            contrastive: default_w_contrastive(),
            next_action: default_w_next_action(),
            outcome: default_w_outcome(),
            masked: default_w_masked(),
        }
    }
}

/// Tool-recommender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "unsupervised" | "supervised"
    #[serde(default = "default_trm_mode")]
    pub mode: String,

    #[serde(default = "default_trm_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_min_episodes")]
    pub min_episodes_before_training: usize,

    // Architecture hyperparameters (opaque to the runtime).
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    #[serde(default = "default_epochs")]
    pub epochs: u32,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    #[serde(default = "default_ema_decay")]
    pub ema_decay: f32,

    #[serde(default = "default_retrain_interval_hours")]
    pub retrain_interval_hours: u64,

    /// "rules" | "keyword" | "disabled"
    #[serde(default = "default_fallback_mode")]
    pub fallback_mode: String,

    #[serde(default)]
    pub loss_weights: LossWeights,
}

fn default_trm_mode() -> String {
    "unsupervised".into()
}
fn default_trm_model_path() -> PathBuf {
    PathBuf::from("~/.ironquill/storage/trm/model.bin")
}
fn default_min_episodes() -> usize {
    5
}
fn default_hidden_size() -> usize {
    512
}
fn default_num_layers() -> usize {
    2
}
fn default_epochs() -> u32 {
    10
}
fn default_learning_rate() -> f32 {
    0.001
}
fn default_ema_decay() -> f32 {
    0.999
}
fn default_retrain_interval_hours() -> u64 {
    24
}
fn default_fallback_mode() -> String {
    "rules".into()
}

impl Default for TrmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_trm_mode(),
            model_path: default_trm_model_path(),
            min_episodes_before_training: default_min_episodes(),
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            ema_decay: default_ema_decay(),
            retrain_interval_hours: default_retrain_interval_hours(),
            fallback_mode: default_fallback_mode(),
            loss_weights: LossWeights::default(),
        }
    }
}

/// Per-tool overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tool_max_lines")]
    pub max_lines: usize,

    #[serde(default)]
    pub require_confirm: bool,

    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tool_max_lines() -> usize {
    2000
}
fn default_tool_timeout_ms() -> u64 {
    120_000
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_lines: default_tool_max_lines(),
            require_confirm: false,
            timeout_ms: default_tool_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub builtin: HashMap<String, ToolConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let mut builtin = HashMap::new();
        builtin.insert(
            "file_read".into(),
            ToolConfig {
                timeout_ms: 60_000,
                ..ToolConfig::default()
            },
        );
        builtin.insert(
            "file_write".into(),
            ToolConfig {
                require_confirm: true,
                timeout_ms: 60_000,
                ..ToolConfig::default()
            },
        );
        builtin.insert("shell".into(), ToolConfig::default());
        builtin.insert(
            "web_fetch".into(),
            ToolConfig {
                timeout_ms: 30_000,
                ..ToolConfig::default()
            },
        );
        Self { builtin }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,

    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
}

fn default_thread_pool_size() -> usize {
    4
}
fn default_max_parallel_tools() -> usize {
    4
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: default_thread_pool_size(),
            max_parallel_tools: default_max_parallel_tools(),
        }
    }
}

/// Filesystem and shell sandbox policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub bash_sandbox: bool,

    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,

    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

fn default_allowed_paths() -> Vec<String> {
    vec!["~".into(), ".".into(), "/tmp".into()]
}
fn default_blocked_commands() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "sudo".into(),
        "> /dev/sd".into(),
        "dd if=/dev/zero".into(),
        "mkfs".into(),
    ]
}
fn default_max_file_size_mb() -> u64 {
    100
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bash_sandbox: true,
            allowed_paths: default_allowed_paths(),
            blocked_commands: default_blocked_commands(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl AgentConfig {
    /// Default config file location: `~/.ironquill/config.toml`.
    pub fn default_path() -> PathBuf {
        PathBuf::from(expand_path("~/.ironquill/config.toml"))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let mut config: AgentConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.api_keys.load_from_env();
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path, or fall back to defaults (with env keys)
    /// when the file does not exist.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(_) => {
                let mut config = Self::default();
                config.api_keys.load_from_env();
                config.expand_paths();
                config
            }
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Expand `~` and environment variables in configured paths.
    pub fn expand_paths(&mut self) {
        self.memory.storage_path = PathBuf::from(expand_path(
            &self.memory.storage_path.to_string_lossy(),
        ));
        self.trm.model_path =
            PathBuf::from(expand_path(&self.trm.model_path.to_string_lossy()));
        for p in &mut self.security.allowed_paths {
            *p = expand_path(p);
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.primary_provider.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm.primary_provider must not be empty".into(),
            ));
        }
        if self.context.compaction_threshold > self.context.max_tokens {
            return Err(ConfigError::ValidationFailed(format!(
                "context.compaction_threshold ({}) exceeds context.max_tokens ({})",
                self.context.compaction_threshold, self.context.max_tokens
            )));
        }
        if self.context.keep_raw_turns == 0 {
            return Err(ConfigError::ValidationFailed(
                "context.keep_raw_turns must be at least 1".into(),
            ));
        }
        if self.trm.min_episodes_before_training == 0 {
            return Err(ConfigError::ValidationFailed(
                "trm.min_episodes_before_training must be at least 1".into(),
            ));
        }
        if self.concurrency.max_parallel_tools == 0 || self.concurrency.thread_pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency sizes must be at least 1".into(),
            ));
        }
        match self.trm.fallback_mode.as_str() {
            "rules" | "keyword" | "disabled" => {}
            other => {
                return Err(ConfigError::ValidationFailed(format!(
                    "trm.fallback_mode '{other}' is not one of rules|keyword|disabled"
                )))
            }
        }
        Ok(())
    }
}

/// Expand a leading `~` and `${VAR}` references in a path string.
pub fn expand_path(path: &str) -> String {
    let mut result = path.to_string();

    if result.starts_with('~') {
        if let Ok(home) = std::env::var("HOME") {
            result = result.replacen('~', &home, 1);
        }
    }

    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var = &result[start + 2..start + end];
        let value = std::env::var(var).unwrap_or_default();
        result.replace_range(start..start + end + 1, &value);
    }

    result
}
