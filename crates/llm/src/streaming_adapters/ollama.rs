//! Ollama NDJSON Stream Adapter
//!
//! `/api/chat` streams one JSON object per line. Tool calls arrive complete
//! in `message.tool_calls`, reasoning either in `message.thinking` or inline
//! in `<think>` tags for thinking models. Local models also leak chat-template
//! tokens into their output, which the adapter's `ArtifactFilter` strips.

use std::sync::Arc;

use agent_engine_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;
use serde_json::Value;

use super::think_tags::{ThinkSegment, ThinkTagSplitter};
use super::CallIdGenerator;
use crate::usage::normalize_usage;

/// Models known to support thinking via <think> tags
const THINKING_MODELS: &[&str] = &["deepseek-r1", "qwq", "qwen-qwq", "qwen3"];

/// Template tokens local models are known to leak.
const DEFAULT_ARTIFACTS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|eot_id|>",
    "<|end|>",
];

/// Post-processing hook applied to Ollama text and reasoning deltas.
pub trait ArtifactFilter: Send + Sync {
    fn clean(&self, text: &str) -> String;
}

/// Removes a fixed set of literal tokens.
#[derive(Debug, Clone)]
pub struct LiteralArtifactFilter {
    tokens: Vec<String>,
}

impl LiteralArtifactFilter {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }
}

impl Default for LiteralArtifactFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIFACTS.iter().copied())
    }
}

impl ArtifactFilter for LiteralArtifactFilter {
    fn clean(&self, text: &str) -> String {
        self.tokens
            .iter()
            .fold(text.to_string(), |acc, token| acc.replace(token.as_str(), ""))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Check if an Ollama model embeds thinking in its output.
pub fn ollama_model_thinks(model: &str) -> bool {
    let model = model.to_lowercase();
    THINKING_MODELS.iter().any(|known| model.contains(known))
        || model.contains("r1")
        || model.contains("qwq")
}

/// Adapter for Ollama `/api/chat` NDJSON
pub struct OllamaAdapter {
    think_tags: Option<ThinkTagSplitter>,
    filter: Option<Arc<dyn ArtifactFilter>>,
    call_ids: CallIdGenerator,
}

impl OllamaAdapter {
    pub fn new(model: &str) -> Self {
        Self {
            think_tags: ollama_model_thinks(model).then(ThinkTagSplitter::new),
            filter: None,
            call_ids: CallIdGenerator::new("ollama_call"),
        }
    }

    pub fn with_artifact_filter(mut self, filter: Arc<dyn ArtifactFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    fn clean(&self, text: String) -> Option<String> {
        let cleaned = match &self.filter {
            Some(filter) => filter.clean(&text),
            None => text,
        };
        (!cleaned.is_empty()).then_some(cleaned)
    }

    fn push_segments(&self, segments: Vec<ThinkSegment>, events: &mut Vec<UnifiedStreamEvent>) {
        for segment in segments {
            match segment {
                ThinkSegment::Text(text) => {
                    if let Some(content) = self.clean(text) {
                        events.push(UnifiedStreamEvent::TextDelta { content });
                    }
                }
                ThinkSegment::Thinking(text) => {
                    if let Some(content) = self.clean(text) {
                        events.push(UnifiedStreamEvent::ThinkingDelta { content });
                    }
                }
            }
        }
    }

    fn flush(&mut self, events: &mut Vec<UnifiedStreamEvent>) {
        if let Some(splitter) = self.think_tags.as_mut() {
            let rest = splitter.finish();
            self.push_segments(rest, events);
        }
    }
}

impl std::fmt::Debug for OllamaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaAdapter")
            .field("splits_think_tags", &self.think_tags.is_some())
            .field("has_artifact_filter", &self.filter.is_some())
            .finish()
    }
}

impl StreamAdapter for OllamaAdapter {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn supports_thinking(&self) -> bool {
        self.think_tags.is_some()
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }

        let chunk: OllamaChunk =
            serde_json::from_str(trimmed).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(error) = chunk.error {
            return Ok(vec![UnifiedStreamEvent::Error {
                message: error,
                code: None,
            }]);
        }

        let mut events = vec![];
        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                self.push_segments(vec![ThinkSegment::Thinking(thinking)], &mut events);
            }
            if let Some(content) = message.content.filter(|c| !c.is_empty()) {
                let segments = match self.think_tags.as_mut() {
                    Some(splitter) => splitter.push(&content),
                    None => vec![ThinkSegment::Text(content)],
                };
                self.push_segments(segments, &mut events);
            }
            for call in message.tool_calls {
                let id = match call.id.filter(|id| !id.is_empty()) {
                    Some(id) => id,
                    None => self.call_ids.next_id(),
                };
                let arguments = match call.function.arguments {
                    Some(Value::String(raw)) => raw,
                    Some(value) => value.to_string(),
                    None => "{}".to_string(),
                };
                events.push(UnifiedStreamEvent::ToolCall {
                    tool_id: id,
                    tool_name: call.function.name,
                    arguments,
                });
            }
        }

        if chunk.done {
            self.flush(&mut events);
            let usage = serde_json::json!({
                "prompt_eval_count": chunk.prompt_eval_count.unwrap_or(0),
                "eval_count": chunk.eval_count.unwrap_or(0),
            });
            events.push(normalize_usage(&usage).to_event());
            events.push(UnifiedStreamEvent::Complete {
                stop_reason: chunk.done_reason,
            });
        }

        Ok(events)
    }

    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        let mut events = vec![];
        self.flush(&mut events);
        events
    }

    fn reset(&mut self) {
        self.call_ids.reset();
        if self.think_tags.is_some() {
            self.think_tags = Some(ThinkTagSplitter::new());
        }
    }
}
