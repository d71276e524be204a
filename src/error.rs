//! Error Handling
//!
//! Engine-level error taxonomy. Provider failures are classified with the
//! retry governor's rules so callers can tell "try later" from "give up".
//! Tool and cache failures map into the same taxonomy for logging and step
//! records, but never end a turn.

use thiserror::Error;

use agent_engine_llm::{classify_failure, CacheFailure, LlmError, RetryReason};
use agent_engine_tools::{ToolFailure, ToolFailureKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Network trouble or a vendor 5xx that outlasted the retries
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Rate limited and out of retries
    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// Bad input (malformed request, invalid arguments)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Explicit cache could not be created; requests continue uncached
    #[error("Cache creation failed: {0}")]
    CacheCreation(String),

    /// Authentication, missing model, context overflow and similar
    #[error("Provider error: {0}")]
    FatalProvider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Turn cancelled")]
    Cancelled,

    /// The turn task itself failed (panicked or was aborted)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine errors
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code, used on terminal `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::RateLimit { .. } => "rate_limit",
            Self::Validation(_) => "validation",
            Self::ToolExecution(_) => "tool_execution",
            Self::CacheCreation(_) => "cache_creation",
            Self::FatalProvider(_) => "fatal_provider",
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether waiting and trying the turn again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimit { .. })
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        match (&err, classify_failure(&err)) {
            (LlmError::Cancelled, _) => EngineError::Cancelled,
            (LlmError::RateLimited { retry_after_ms, .. }, _) => EngineError::RateLimit {
                message: err.message(),
                retry_after_ms: *retry_after_ms,
            },
            (_, RetryReason::RateLimit) => EngineError::RateLimit {
                message: err.message(),
                retry_after_ms: None,
            },
            (_, RetryReason::Transient) => EngineError::TransientNetwork(err.to_string()),
            (LlmError::InvalidRequest { .. }, _) => EngineError::Validation(err.to_string()),
            _ => EngineError::FatalProvider(err.to_string()),
        }
    }
}

impl From<&ToolFailure> for EngineError {
    fn from(failure: &ToolFailure) -> Self {
        match failure.kind {
            ToolFailureKind::Validation => EngineError::Validation(failure.message.clone()),
            ToolFailureKind::Execution | ToolFailureKind::NotFound => {
                EngineError::ToolExecution(failure.message.clone())
            }
        }
    }
}

impl From<&CacheFailure> for EngineError {
    fn from(failure: &CacheFailure) -> Self {
        EngineError::CacheCreation(format!("{}: {}", failure.model, failure.error))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
