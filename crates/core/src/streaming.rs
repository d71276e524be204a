//! Unified Stream Event Types
//!
//! Provider-agnostic event types and the adapter trait that turns each
//! vendor's wire chunks into them. Shared by the LLM crate (normalizers and
//! provider adapters) and the root crate (agentic loop, callback dispatch).

use serde::{Deserialize, Serialize};

/// Unified streaming event that every vendor normalizer converts to.
///
/// Only some variants reach the turn's caller: `ToolCall` and the raw
/// `Usage` chunks produced by normalizers are consumed by the stream driver,
/// and the loop re-emits tool lifecycle and usage events once per step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Visible text content delta from the model
    TextDelta { content: String },

    /// Reasoning/thinking content delta, kept apart from visible text
    ThinkingDelta { content: String },

    /// A tool call is about to execute
    ToolStart {
        tool_id: String,
        tool_name: String,
        /// Complete JSON string of tool arguments
        arguments: String,
    },

    /// A tool call whose arguments are complete.
    ///
    /// Normalizers buffer partial argument fragments and emit this exactly
    /// once per call id.
    ToolCall {
        tool_id: String,
        tool_name: String,
        /// Complete JSON string of tool arguments
        arguments: String,
    },

    /// Tool execution result (model-visible payload)
    ToolResult {
        tool_id: String,
        tool_name: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview_key: Option<String>,
    },

    /// Tool execution failed; the error was fed back to the model
    ToolError {
        tool_id: String,
        tool_name: String,
        error: String,
    },

    /// One adapter invocation (step) finished
    StepFinish {
        step_index: u32,
        tool_calls: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
        reasoning_tokens: u32,
        total_tokens: u32,
    },

    /// Error during streaming
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream complete
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Short snake_case tag, matching the serialized `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::StepFinish { .. } => "step_finish",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Errors that can occur during stream adaptation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AdapterError {
    /// Invalid format that couldn't be parsed
    InvalidFormat(String),
    /// JSON/data parsing error
    ParseError(String),
    /// Event type not supported by this adapter
    UnsupportedEvent(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AdapterError::UnsupportedEvent(msg) => write!(f, "Unsupported event: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Trait for adapting provider-specific stream formats to unified events.
///
/// Implementations are pure translators: one wire line in, zero or more
/// unified events out. They hold only the buffering state needed to
/// assemble tool arguments and split reasoning from text.
pub trait StreamAdapter: Send + Sync {
    /// Returns the provider name for logging and identification.
    fn provider_name(&self) -> &'static str;

    /// Returns whether this adapter/provider surfaces reasoning deltas.
    fn supports_thinking(&self) -> bool;

    /// Returns whether this adapter/provider supports tool calls.
    fn supports_tools(&self) -> bool;

    /// Adapt a raw stream line/chunk to unified events.
    ///
    /// A single input line may produce zero, one, or multiple events.
    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>;

    /// Flush anything still buffered once the transport reports end of stream.
    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        Vec::new()
    }

    /// Reset adapter state for a new stream.
    fn reset(&mut self) {}
}
