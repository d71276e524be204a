//! Core Error Types
//!
//! Foundational error types shared by every Agent Engine crate. Kept
//! dependency-free (thiserror + serde_json only) so the tool contract can
//! be implemented without pulling in the provider stack.

use thiserror::Error;

/// Core error type for the Agent Engine workspace.
///
/// Tool implementations return this from `execute`; the tool bridge turns
/// any variant into a structured result the model can read.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or schema-violating tool arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// A tool ran and failed
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// The surrounding turn was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a tool execution error
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from bad input rather than a failing tool.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Serialization(_))
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
