//! Anthropic Messages API Adapter
//!
//! Handles the SSE format of the messages API with content_block_delta parsing.
//! Tool input arrives as `input_json_delta` fragments per content block and is
//! surfaced as one `ToolCall` when the block stops.

use std::collections::HashMap;

use agent_engine_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;
use serde_json::Value;

use super::sse_data;
use crate::usage::normalize_usage;

/// Internal event types from the Anthropic SSE format
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<Value>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    input: String,
}

/// Adapter for the Anthropic SSE format
#[derive(Debug, Default)]
pub struct AnthropicAdapter {
    /// Tool blocks being assembled, keyed by content block index
    tools: HashMap<usize, PendingTool>,
    stop_reason: Option<String>,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamAdapter for AnthropicAdapter {
    fn provider_name(&self) -> &'static str {
        "anthropic"
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

        let event: AnthropicEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let events = match event {
            AnthropicEvent::MessageStart { message } => message
                .usage
                .map(|usage| vec![normalize_usage(&usage).to_event()])
                .unwrap_or_default(),
            AnthropicEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let ContentBlock::ToolUse { id, name } = content_block {
                    self.tools.insert(
                        index,
                        PendingTool {
                            id,
                            name,
                            input: String::new(),
                        },
                    );
                }
                vec![]
            }
            AnthropicEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => vec![UnifiedStreamEvent::TextDelta { content: text }],
                Delta::ThinkingDelta { thinking } => {
                    vec![UnifiedStreamEvent::ThinkingDelta { content: thinking }]
                }
                Delta::InputJsonDelta { partial_json } => {
                    match self.tools.get_mut(&index) {
                        Some(tool) => tool.input.push_str(&partial_json),
                        None => {
                            return Err(AdapterError::InvalidFormat(format!(
                                "input_json_delta for unknown block {}",
                                index
                            )))
                        }
                    }
                    vec![]
                }
                Delta::Other => vec![],
            },
            AnthropicEvent::ContentBlockStop { index } => self
                .tools
                .remove(&index)
                .map(|tool| {
                    vec![UnifiedStreamEvent::ToolCall {
                        tool_id: tool.id,
                        tool_name: tool.name,
                        arguments: tool.input,
                    }]
                })
                .unwrap_or_default(),
            AnthropicEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                usage
                    .map(|usage| vec![normalize_usage(&usage).to_event()])
                    .unwrap_or_default()
            }
            AnthropicEvent::MessageStop => vec![UnifiedStreamEvent::Complete {
                stop_reason: self.stop_reason.take(),
            }],
            AnthropicEvent::Error { error } => vec![UnifiedStreamEvent::Error {
                message: error.message,
                code: error.error_type,
            }],
            AnthropicEvent::Ping | AnthropicEvent::Unknown => vec![],
        };

        Ok(events)
    }

    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        // A stream cut before content_block_stop still yields its calls.
        let mut pending: Vec<(usize, PendingTool)> = self.tools.drain().collect();
        pending.sort_by_key(|(index, _)| *index);
        pending
            .into_iter()
            .map(|(_, tool)| UnifiedStreamEvent::ToolCall {
                tool_id: tool.id,
                tool_name: tool.name,
                arguments: tool.input,
            })
            .collect()
    }

    fn reset(&mut self) {
        self.tools.clear();
        self.stop_reason = None;
    }
}
