//! Gemini Provider
//!
//! Implementation of the LlmProvider trait for the Gemini generateContent
//! API. Function calls arrive complete and may come several per response.
//! When an [`ExplicitCacheManager`] is attached, long conversation prefixes
//! are stored server-side and requests reference them by `cachedContent`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cache::ExplicitCacheManager;
use crate::http_client::{build_http_client, send_streaming_request};
use crate::provider::{error_from_response, missing_api_key_error, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::GeminiAdapter;
use crate::tool_names::{NamingRules, ToolNameMap};
use crate::tool_schema::to_gemini_tools;
use crate::types::{
    LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole, ProviderConfig,
    ToolCallMode,
};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default Gemini API base
pub(crate) const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Call id -> original tool name, from every tool-use block in `messages`.
///
/// Gemini's `functionResponse` is matched by name, not id.
pub(crate) fn tool_names_by_call_id(messages: &[Message]) -> HashMap<String, String> {
    messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| match c {
            MessageContent::ToolUse { id, name, .. } => Some((id.clone(), name.clone())),
            _ => None,
        })
        .collect()
}

/// Convert history messages into Gemini `contents`.
pub(crate) fn to_gemini_contents(
    messages: &[Message],
    call_names: &HashMap<String, String>,
    names: &ToolNameMap,
) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .filter_map(|message| {
            let role = match message.role {
                MessageRole::Assistant => "model",
                _ => "user",
            };
            let parts: Vec<Value> = message
                .content
                .iter()
                .filter_map(|content| match content {
                    MessageContent::Text { text } if !text.is_empty() => {
                        Some(json!({ "text": text }))
                    }
                    MessageContent::Text { .. } | MessageContent::Thinking { .. } => None,
                    MessageContent::ToolUse { name, input, .. } => Some(json!({
                        "functionCall": { "name": names.outbound(name), "args": input }
                    })),
                    MessageContent::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let original = call_names
                            .get(tool_use_id)
                            .map(String::as_str)
                            .unwrap_or(tool_use_id.as_str());
                        let response = if is_error.unwrap_or(false) {
                            json!({ "error": content })
                        } else {
                            json!({ "content": content })
                        };
                        Some(json!({
                            "functionResponse": {
                                "name": names.outbound(original),
                                "response": response,
                            }
                        }))
                    }
                })
                .collect();
            (!parts.is_empty()).then(|| json!({ "role": role, "parts": parts }))
        })
        .collect()
}

pub(crate) fn system_instruction(system: &str) -> Value {
    json!({ "parts": [{ "text": system }] })
}

/// Request system prompt merged with any system-role history messages.
pub(crate) fn combined_system(request: &StreamRequest) -> Option<String> {
    let mut parts: Vec<String> = request.system.iter().cloned().collect();
    parts.extend(
        request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(Message::text_content),
    );
    let system = parts.join("\n\n");
    (!system.is_empty()).then_some(system)
}

fn forced_function_mode(mode: ToolCallMode) -> Option<&'static str> {
    match mode {
        ToolCallMode::Auto => None,
        ToolCallMode::Required => Some("ANY"),
        ToolCallMode::None => Some("NONE"),
    }
}

/// Gemini provider
pub struct GeminiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    cache: Option<Arc<ExplicitCacheManager>>,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            client,
            cache: None,
        })
    }

    /// Attach an explicit cache manager.
    pub fn with_cache(mut self, cache: Arc<ExplicitCacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_API_BASE)
            .trim_end_matches('/')
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("gemini"))
    }

    fn stream_url(&self) -> LlmResult<url::Url> {
        let raw = format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url(),
            self.config.model
        );
        let mut url = url::Url::parse(&raw).map_err(|e| LlmError::InvalidRequest {
            message: format!("invalid Gemini URL {}: {}", raw, e),
        })?;
        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }

    fn generation_config(&self, request: &StreamRequest) -> Value {
        let mut config = json!({
            "maxOutputTokens": self.config.max_tokens,
            "temperature": request
                .options
                .temperature_override
                .unwrap_or(self.config.temperature),
        });
        if self.config.enable_thinking {
            let mut thinking = json!({ "includeThoughts": true });
            if let Some(budget) = self.config.thinking_budget {
                thinking["thinkingBudget"] = json!(budget);
            }
            config["thinkingConfig"] = thinking;
        }
        config
    }

    /// Build the request body, referencing `cached` when the cache covers a
    /// prefix of the history.
    fn build_request_body(
        &self,
        request: &StreamRequest,
        names: &ToolNameMap,
        tools: &[crate::types::ToolDefinition],
        cached: Option<&crate::cache::CacheHit>,
    ) -> Value {
        let call_names = tool_names_by_call_id(&request.messages);
        let mut body = json!({ "generationConfig": self.generation_config(request) });
        let forced_mode = forced_function_mode(request.options.tool_call_mode);

        // A cached request cannot carry tools or toolConfig, so a forced
        // calling mode always goes out uncached.
        match cached.filter(|_| forced_mode.is_none() || tools.is_empty()) {
            Some(hit) => {
                // System instruction and tools live inside the cache entry.
                let tail = &request.messages[hit.message_count.min(request.messages.len())..];
                body["cachedContent"] = json!(hit.cache_id);
                body["contents"] = Value::Array(to_gemini_contents(tail, &call_names, names));
            }
            None => {
                body["contents"] =
                    Value::Array(to_gemini_contents(&request.messages, &call_names, names));
                if let Some(system) = combined_system(request) {
                    body["systemInstruction"] = system_instruction(&system);
                }
                if !tools.is_empty() {
                    body["tools"] = to_gemini_tools(tools);
                    if let Some(mode) = forced_mode {
                        body["toolConfig"] = json!({ "functionCallingConfig": { "mode": mode } });
                    }
                }
            }
        }

        crate::chat_completions::merge_options(&mut body, &self.config);
        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        self.config.enable_thinking
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    fn naming_rules(&self) -> NamingRules {
        NamingRules::STRICT
    }

    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let api_key = self.api_key()?;
        let (names, tools) = ToolNameMap::advertise(self.naming_rules(), &request.tools);

        let cacheable = forced_function_mode(request.options.tool_call_mode).is_none()
            || request.tools.is_empty();
        let cached = match &self.cache {
            Some(cache) if cacheable => {
                let system = combined_system(&request);
                // The cache stores tools under their original names and
                // applies the same sanitization when it builds an entry.
                cache
                    .prepare(
                        &request.session_id,
                        &self.config.model,
                        system.as_deref(),
                        &request.tools,
                        &request.messages,
                    )
                    .await
            }
            _ => None,
        };
        if request.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let body = self.build_request_body(&request, &names, &tools, cached.as_ref());
        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            cached_messages = cached.as_ref().map_or(0, |h| h.message_count),
            "Streaming Gemini request"
        );

        let http_request = self
            .client
            .post(self.stream_url()?)
            .header("x-goog-api-key", api_key)
            .json(&body);
        let response = send_streaming_request(http_request, &request.cancel, "gemini").await?;

        let mut adapter = GeminiAdapter::new();
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
        let api_key = self.api_key()?;
        let url = format!("{}/models/{}", self.base_url(), self.config.model);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(LlmError::network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, "gemini").await)
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
