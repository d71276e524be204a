//! Tool Call Results
//!
//! What the bridge hands back for one call: either the model-visible
//! payload or a structured failure. Failures are data, not errors; the loop
//! feeds them to the model and keeps going.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agent_engine_core::streaming::UnifiedStreamEvent;
use agent_engine_llm::MessageContent;

/// Why a tool call did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// Arguments were malformed or did not match the schema
    Validation,
    /// The tool ran and failed, or panicked
    Execution,
    /// No tool is registered under the requested name
    NotFound,
}

impl std::fmt::Display for ToolFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolFailureKind::Validation => write!(f, "validation"),
            ToolFailureKind::Execution => write!(f, "execution"),
            ToolFailureKind::NotFound => write!(f, "not_found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolFailureKind::Validation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolFailureKind::Execution, message)
    }

    pub fn not_found(tool_name: &str) -> Self {
        Self::new(
            ToolFailureKind::NotFound,
            format!("Tool not found: {}", tool_name),
        )
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    /// Original (application-side) tool name
    pub tool_name: String,
    /// Model-visible payload, or why there is none
    pub outcome: Result<Value, ToolFailure>,
    /// Key of the UI payload in the preview store, when one was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_key: Option<String>,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, tool_name: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome: Ok(value),
            preview_key: None,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        failure: ToolFailure,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome: Err(failure),
            preview_key: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Text sent to the model. String payloads go verbatim; anything else
    /// as compact JSON. Failures become `{"error": .., "kind": ..}`.
    pub fn model_content(&self) -> String {
        match &self.outcome {
            Ok(Value::String(text)) => text.clone(),
            Ok(value) => value.to_string(),
            Err(failure) => json!({
                "error": failure.message,
                "kind": failure.kind,
            })
            .to_string(),
        }
    }

    /// The `tool_result` block appended to the conversation.
    pub fn to_message_content(&self) -> MessageContent {
        MessageContent::ToolResult {
            tool_use_id: self.call_id.clone(),
            content: self.model_content(),
            is_error: self.is_error().then_some(true),
        }
    }

    /// The `tool_result` / `tool_error` stream event for this call.
    pub fn to_event(&self) -> UnifiedStreamEvent {
        match &self.outcome {
            Ok(_) => UnifiedStreamEvent::ToolResult {
                tool_id: self.call_id.clone(),
                tool_name: self.tool_name.clone(),
                result: self.model_content(),
                preview_key: self.preview_key.clone(),
            },
            Err(failure) => UnifiedStreamEvent::ToolError {
                tool_id: self.call_id.clone(),
                tool_name: self.tool_name.clone(),
                error: failure.to_string(),
            },
        }
    }
}
