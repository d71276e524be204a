//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the unique streaming format of its provider.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai_compat;
pub mod think_tags;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use ollama::{ollama_model_thinks, ArtifactFilter, LiteralArtifactFilter, OllamaAdapter};
pub use openai_compat::OpenAiCompatAdapter;
pub use think_tags::{ThinkSegment, ThinkTagSplitter};

/// Ids for tool calls the vendor did not name.
///
/// Each generator draws a random nonce, so ids stay unique across the
/// adapter instances of one turn and across turns of a conversation.
#[derive(Debug, Clone)]
pub(crate) struct CallIdGenerator {
    prefix: &'static str,
    nonce: String,
    counter: usize,
}

impl CallIdGenerator {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            nonce: fresh_nonce(),
            counter: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}_{}_{}", self.prefix, self.nonce, self.counter)
    }

    pub(crate) fn reset(&mut self) {
        self.nonce = fresh_nonce();
        self.counter = 0;
    }
}

fn fresh_nonce() -> String {
    let mut nonce = uuid::Uuid::new_v4().simple().to_string();
    nonce.truncate(12);
    nonce
}

/// Payload of an SSE `data:` line.
///
/// Returns `None` for `event:`, `id:`, `retry:`, comment and blank lines.
/// Bare JSON lines are passed through for vendors that skip the prefix.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        let rest = rest.trim_start();
        return (!rest.is_empty()).then_some(rest);
    }
    trimmed.starts_with('{').then_some(trimmed)
}
