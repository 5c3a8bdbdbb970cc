//! Error taxonomy for the ironquill runtime.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum, aggregated into the top-level [`Error`].
//! Two predicates drive control flow everywhere else: [`Error::is_retriable`]
//! (the gateway may retry once on a fallback provider) and
//! [`Error::is_fatal`] (the orchestrator aborts the turn).

use thiserror::Error;

/// The top-level error type for all ironquill operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Recommender error: {0}")]
    Trm(#[from] TrmError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Configuration error: {0}")]
    Config(#[from] ironquill_config::ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias defaulting to our Error.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether this error class is worth one retry on a fallback provider.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Llm(e) => e.is_retriable(),
            Error::Tool(ToolError::Timeout { .. }) => true,
            Error::Network(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether this error leaves the runtime in a state where continuing
    /// the turn would be wrong (missing credentials, corrupt storage).
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Llm(LlmError::ApiKeyMissing(_)) => true,
            Error::Config(e) => matches!(
                e,
                ironquill_config::ConfigError::ParseFailed(_)
                    | ironquill_config::ConfigError::ValidationFailed(_)
            ),
            Error::Memory(MemoryError::Corrupted { .. }) => true,
            Error::PathNotAllowed(_) => true,
            _ => false,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Failed to connect to provider: {0}")]
    ConnectionFailed(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("API key not configured for {0}")]
    ApiKeyMissing(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Token limit exceeded: {0}")]
    TokenLimitExceeded(String),

    #[error("Streaming error: {0}")]
    StreamError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl LlmError {
    /// Retriable LLM failures: transient conditions a different provider
    /// (or a later attempt) may not share. Provider-overloaded responses
    /// (HTTP 503/529) map to `ProviderUnavailable` and count as retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::ConnectionFailed(_)
                | LlmError::StreamError(_)
                | LlmError::Timeout(_)
                | LlmError::ProviderUnavailable(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Failed to load {what}: {reason}")]
    LoadFailed { what: String, reason: String },

    #[error("Failed to save {what}: {reason}")]
    SaveFailed { what: String, reason: String },

    #[error("Corrupted data in {what}: {reason}")]
    Corrupted { what: String, reason: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool} — {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Tool argument validation failed: {tool} — {reason}")]
    ValidationFailed { tool: String, reason: String },

    #[error("Tool timed out: {tool} after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool permission denied: {tool} — {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("Tool is disabled: {0}")]
    Disabled(String),
}

#[derive(Debug, Clone, Error)]
pub enum TrmError {
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Training failed: {0}")]
    TrainingFailed(String),

    #[error("Insufficient training data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Model file corrupted: {0}")]
    ModelCorrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Failed to build context: {0}")]
    BuildFailed(String),

    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    #[error("Context too large: {estimated} tokens > {max} max")]
    TooLarge { estimated: usize, max: usize },
}
