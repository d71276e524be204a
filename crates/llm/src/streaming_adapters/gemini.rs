//! Gemini SSE Stream Adapter
//!
//! Handles `streamGenerateContent?alt=sse` chunks. Gemini sends each
//! `functionCall` part complete, so tool calls are surfaced as soon as they
//! appear; parts flagged `thought: true` carry reasoning summaries.

use agent_engine_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;
use serde_json::Value;

use super::{sse_data, CallIdGenerator};
use crate::usage::normalize_usage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<Value>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Adapter for Gemini SSE chunks
#[derive(Debug)]
pub struct GeminiAdapter {
    /// Gemini only sometimes assigns call ids
    call_ids: CallIdGenerator,
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self {
            call_ids: CallIdGenerator::new("gemini_call"),
        }
    }
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamAdapter for GeminiAdapter {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn supports_thinking(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let Some(json_str) = sse_data(input) else {
            return Ok(vec![]);
        };
        if json_str == "[DONE]" {
            return Ok(vec![]);
        }

        // Errors may arrive wrapped in a one-element array.
        let value: Value =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;
        let value = match value {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        };
        let chunk: GeminiChunk =
            serde_json::from_value(value).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(error) = chunk.error {
            let code = error
                .status
                .or_else(|| error.code.map(|c| c.to_string()));
            return Ok(vec![UnifiedStreamEvent::Error {
                message: error.message.unwrap_or_else(|| "Gemini stream error".to_string()),
                code,
            }]);
        }

        let mut events = vec![];
        for candidate in chunk.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = part.function_call {
                    let id = call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| self.call_ids.next_id());
                    let arguments = call
                        .args
                        .map(|args| args.to_string())
                        .unwrap_or_else(|| "{}".to_string());
                    events.push(UnifiedStreamEvent::ToolCall {
                        tool_id: id,
                        tool_name: call.name,
                        arguments,
                    });
                    continue;
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    if part.thought.unwrap_or(false) {
                        events.push(UnifiedStreamEvent::ThinkingDelta { content: text });
                    } else {
                        events.push(UnifiedStreamEvent::TextDelta { content: text });
                    }
                }
            }

            if let Some(reason) = candidate.finish_reason {
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(reason.to_lowercase()),
                });
            }
        }

        if let Some(usage) = chunk.usage_metadata.filter(|u| u.is_object()) {
            events.push(normalize_usage(&usage).to_event());
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.call_ids.reset();
    }
}
