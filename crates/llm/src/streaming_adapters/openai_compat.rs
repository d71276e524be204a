//! OpenAI-Compatible SSE Stream Adapter
//!
//! Chat-completions chunks as sent by OpenAI, DeepSeek and GLM. Reasoning
//! arrives in `reasoning_content` for vendors that surface it; DeepSeek's
//! reasoning models may also inline it in `<think>` tags, which are split out
//! only for those models.

use std::collections::BTreeMap;

use agent_engine_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;
use serde_json::Value;

use super::sse_data;
use super::think_tags::{ThinkSegment, ThinkTagSplitter};
use crate::usage::normalize_usage;

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingTool {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Adapter for OpenAI-style chat-completion chunks
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    provider: &'static str,
    reasoning_field: bool,
    /// Present when `<think>` tags in content must be split out
    think_tags: Option<ThinkTagSplitter>,
    /// Tool calls being assembled, keyed by the vendor's index
    tools: BTreeMap<usize, PendingTool>,
    generated_ids: usize,
}

impl OpenAiCompatAdapter {
    fn with_options(provider: &'static str, reasoning_field: bool, split_think_tags: bool) -> Self {
        Self {
            provider,
            reasoning_field,
            think_tags: split_think_tags.then(ThinkTagSplitter::new),
            tools: BTreeMap::new(),
            generated_ids: 0,
        }
    }

    pub fn openai() -> Self {
        Self::with_options("openai", false, false)
    }

    /// `<think>` splitting only applies to DeepSeek's reasoning models.
    pub fn deepseek(model: &str) -> Self {
        Self::with_options("deepseek", true, deepseek_model_reasons(model))
    }

    pub fn glm() -> Self {
        Self::with_options("glm", true, false)
    }

    fn split_content(&mut self, content: String, events: &mut Vec<UnifiedStreamEvent>) {
        let Some(splitter) = self.think_tags.as_mut() else {
            events.push(UnifiedStreamEvent::TextDelta { content });
            return;
        };
        events.extend(splitter.push(&content).into_iter().map(segment_event));
    }

    fn accumulate_tool(&mut self, tc: ToolCallDelta) {
        // Some vendors omit `index`; fall back to matching by id, then to the
        // most recent call for id-less continuation chunks.
        let index = tc.index.unwrap_or_else(|| {
            let by_id = tc.id.as_deref().filter(|id| !id.is_empty()).and_then(|id| {
                self.tools
                    .iter()
                    .find(|(_, t)| t.id.as_deref() == Some(id))
                    .map(|(i, _)| *i)
            });
            match (by_id, tc.id.as_deref().filter(|id| !id.is_empty())) {
                (Some(i), _) => i,
                (None, Some(_)) => self.tools.keys().next_back().map_or(0, |i| i + 1),
                (None, None) => self.tools.keys().next_back().copied().unwrap_or(0),
            }
        });

        let entry = self.tools.entry(index).or_default();
        if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
            entry.id.get_or_insert(id);
        }
        if let Some(function) = tc.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                entry.name.get_or_insert(name);
            }
            if let Some(args) = function.arguments {
                entry.arguments.push_str(&args);
            }
        }
    }

    fn flush_tools(&mut self) -> Vec<UnifiedStreamEvent> {
        let pending = std::mem::take(&mut self.tools);
        let mut events = Vec::with_capacity(pending.len());
        for (_, tool) in pending {
            let Some(name) = tool.name else {
                tracing::warn!(provider = self.provider, "Dropping tool call without a name");
                continue;
            };
            let id = tool.id.unwrap_or_else(|| {
                self.generated_ids += 1;
                format!("call_{}_{}", self.provider, self.generated_ids)
            });
            events.push(UnifiedStreamEvent::ToolCall {
                tool_id: id,
                tool_name: name,
                arguments: tool.arguments,
            });
        }
        events
    }

    fn flush_all(&mut self) -> Vec<UnifiedStreamEvent> {
        let mut events = self.flush_tools();
        if let Some(splitter) = self.think_tags.as_mut() {
            events.extend(splitter.finish().into_iter().map(segment_event));
        }
        events
    }
}

fn segment_event(segment: ThinkSegment) -> UnifiedStreamEvent {
    match segment {
        ThinkSegment::Text(content) => UnifiedStreamEvent::TextDelta { content },
        ThinkSegment::Thinking(content) => UnifiedStreamEvent::ThinkingDelta { content },
    }
}

/// DeepSeek models that emit reasoning (R1 family and `deepseek-reasoner`).
pub fn deepseek_model_reasons(model: &str) -> bool {
    let model = model.to_lowercase();
    model.contains("r1") || model.contains("reasoner")
}

impl StreamAdapter for OpenAiCompatAdapter {
    fn provider_name(&self) -> &'static str {
        self.provider
    }

    fn supports_thinking(&self) -> bool {
        self.reasoning_field || self.think_tags.is_some()
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let Some(json_str) = sse_data(input) else {
            return Ok(vec![]);
        };
        if json_str == "[DONE]" {
            return Ok(self.flush_all());
        }

        let chunk: ChatChunk =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(error) = chunk.error {
            let code = error.error_type.or_else(|| {
                error.code.map(|c| match c {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            });
            return Ok(vec![UnifiedStreamEvent::Error {
                message: error.message.unwrap_or_else(|| "stream error".to_string()),
                code,
            }]);
        }

        let mut events = vec![];
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                    if self.reasoning_field {
                        events.push(UnifiedStreamEvent::ThinkingDelta { content: reasoning });
                    }
                }
                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    self.split_content(content, &mut events);
                }
                for tc in delta.tool_calls.unwrap_or_default() {
                    self.accumulate_tool(tc);
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                events.extend(self.flush_all());
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        // Usage trails the finish chunk when `include_usage` is set.
        if let Some(usage) = chunk.usage.filter(|u| u.is_object()) {
            events.push(normalize_usage(&usage).to_event());
        }

        Ok(events)
    }

    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        self.flush_all()
    }

    fn reset(&mut self) {
        self.tools.clear();
        self.generated_ids = 0;
        if self.think_tags.is_some() {
            self.think_tags = Some(ThinkTagSplitter::new());
        }
    }
}
