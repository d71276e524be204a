//! Ollama Provider
//!
//! Local models served by Ollama's `/api/chat`. The stream is NDJSON rather
//! than SSE. Reasoning models either report `thinking` natively or embed
//! `<think>` tags in their content; chat-template tokens that leak into the
//! output are removed by an [`ArtifactFilter`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::http_client::build_http_client;
use crate::provider::{error_from_response, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::{ollama_model_thinks, ArtifactFilter, LiteralArtifactFilter, OllamaAdapter};
use crate::tool_names::ToolNameMap;
use crate::tool_schema::to_openai_tool;
use crate::types::{
    LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole, ProviderConfig,
    ToolCallMode,
};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default Ollama server
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    filter: Arc<dyn ArtifactFilter>,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            client,
            filter: Arc::new(LiteralArtifactFilter::default()),
        })
    }

    /// Replace the default chat-template token filter.
    pub fn with_artifact_filter(mut self, filter: Arc<dyn ArtifactFilter>) -> Self {
        self.filter = filter;
        self
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_BASE_URL)
            .trim_end_matches('/')
    }

    /// Connection failures mean the local server is not running.
    fn unavailable(&self, err: reqwest::Error) -> LlmError {
        if err.is_connect() {
            LlmError::ProviderUnavailable {
                message: format!("Ollama is not reachable at {}: {}", self.base_url(), err),
            }
        } else {
            LlmError::network(err)
        }
    }

    fn convert_messages(request: &StreamRequest, names: &ToolNameMap) -> Vec<Value> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            out.push(json!({ "role": "system", "content": system }));
        }
        for message in &request.messages {
            out.extend(Self::convert_message(message, names));
        }
        out
    }

    fn convert_message(message: &Message, names: &ToolNameMap) -> Vec<Value> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        let mut out = Vec::new();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text { text: t } => text.push_str(t),
                // Ollama takes arguments as an object, not a JSON string.
                MessageContent::ToolUse { name, input, .. } => tool_calls.push(json!({
                    "function": { "name": names.outbound(name), "arguments": input }
                })),
                MessageContent::ToolResult { content, .. } => {
                    out.push(json!({ "role": "tool", "content": content }))
                }
                MessageContent::Thinking { .. } => {}
            }
        }
        if !tool_calls.is_empty() {
            out.push(json!({ "role": role, "content": text, "tool_calls": tool_calls }));
        } else if !text.is_empty() {
            out.push(json!({ "role": role, "content": text }));
        }
        out
    }

    fn build_request_body(
        &self,
        request: &StreamRequest,
        names: &ToolNameMap,
        tools: &[crate::types::ToolDefinition],
    ) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": Self::convert_messages(request, names),
            "stream": true,
            "options": {
                "num_predict": self.config.max_tokens,
                "temperature": request
                    .options
                    .temperature_override
                    .unwrap_or(self.config.temperature),
            },
        });
        if self.config.enable_thinking && ollama_model_thinks(&self.config.model) {
            body["think"] = json!(true);
        }
        // Ollama has no tool_choice; `None` simply withholds the tools.
        if !tools.is_empty() && request.options.tool_call_mode != ToolCallMode::None {
            body["tools"] = Value::Array(tools.iter().map(to_openai_tool).collect());
        }
        crate::chat_completions::merge_options(&mut body, &self.config);
        body
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        ollama_model_thinks(&self.config.model)
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let (names, tools) = ToolNameMap::advertise(self.naming_rules(), &request.tools);
        let body = self.build_request_body(&request, &names, &tools);
        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Streaming Ollama request"
        );

        let http_request = self
            .client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&body);
        let response = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(LlmError::Cancelled),
            response = http_request.send() => response.map_err(|e| self.unavailable(e))?,
        };
        if !response.status().is_success() {
            return Err(error_from_response(response, "ollama").await);
        }

        let mut adapter =
            OllamaAdapter::new(&self.config.model).with_artifact_filter(self.filter.clone());
        drive_stream(
            response.bytes_stream(),
            &mut adapter,
            &names,
            &tx,
            &request.cancel,
            &self.config.model,
        )
        .await
    }

    async fn health_check(&self) -> LlmResult<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url()))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        if !response.status().is_success() {
            return Err(error_from_response(response, "ollama").await);
        }
        let tags: Value = response.json().await.map_err(LlmError::parse)?;
        let installed = tags
            .get("models")
            .and_then(Value::as_array)
            .is_some_and(|models| {
                models.iter().any(|m| {
                    m.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| {
                            name == self.config.model
                                || name.strip_suffix(":latest") == Some(self.config.model.as_str())
                        })
                })
            });
        if installed {
            Ok(())
        } else {
            Err(LlmError::ModelNotFound {
                model: self.config.model.clone(),
            })
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
