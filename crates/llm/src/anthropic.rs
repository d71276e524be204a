//! Anthropic Provider
//!
//! Implementation of the LlmProvider trait for the Anthropic messages API.
//! Supports extended thinking and native parallel tool use. The system
//! prompt and the last tool carry `cache_control` hints so the vendor's
//! prefix cache covers them.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::http_client::{build_http_client, send_streaming_request};
use crate::provider::{error_from_response, missing_api_key_error, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::AnthropicAdapter;
use crate::tool_names::ToolNameMap;
use crate::tool_schema::to_anthropic_tool;
use crate::types::{
    LlmError, LlmResponse, LlmResult, Message, MessageContent, MessageRole, ProviderConfig,
    ToolCallMode, ToolDefinition,
};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Budget used when thinking is enabled without an explicit one
const DEFAULT_THINKING_BUDGET: u32 = 4096;

/// Anthropic provider
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("anthropic"))
    }

    /// Convert a Message to the messages API format. System messages are
    /// hoisted into the `system` field by the caller.
    fn message_to_api(message: &Message, names: &ToolNameMap) -> Option<Value> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => return None,
        };

        let blocks: Vec<Value> = message
            .content
            .iter()
            .filter_map(|content| match content {
                MessageContent::Text { text } if !text.is_empty() => {
                    Some(json!({ "type": "text", "text": text }))
                }
                MessageContent::Text { .. } => None,
                MessageContent::ToolUse { id, name, input } => Some(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": names.outbound(name),
                    "input": input,
                })),
                MessageContent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut block = json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                    });
                    if is_error.unwrap_or(false) {
                        block["is_error"] = json!(true);
                    }
                    Some(block)
                }
                // Replaying thinking requires the vendor's signature, which is not kept.
                MessageContent::Thinking { .. } => None,
            })
            .collect();

        (!blocks.is_empty()).then(|| json!({ "role": role, "content": blocks }))
    }

    fn build_request_body(
        &self,
        request: &StreamRequest,
        names: &ToolNameMap,
        tools: &[ToolDefinition],
    ) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        });

        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(Message::text_content),
        );
        let system = system_parts.join("\n\n");
        if !system.is_empty() {
            body["system"] = json!([{
                "type": "text",
                "text": system,
                "cache_control": { "type": "ephemeral" }
            }]);
        }

        body["messages"] = Value::Array(
            request
                .messages
                .iter()
                .filter_map(|m| Self::message_to_api(m, names))
                .collect(),
        );

        // Thinking is only requested when no unsigned tool-use block is
        // being continued; the vendor rejects that history otherwise.
        if self.config.enable_thinking && !continues_tool_use(&request.messages) {
            let budget = self
                .config
                .thinking_budget
                .unwrap_or(DEFAULT_THINKING_BUDGET);
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        } else {
            // Temperature is rejected alongside extended thinking.
            body["temperature"] = json!(request
                .options
                .temperature_override
                .unwrap_or(self.config.temperature));
        }

        if !tools.is_empty() {
            let mut api_tools: Vec<Value> = tools.iter().map(to_anthropic_tool).collect();
            if let Some(last) = api_tools.last_mut() {
                last["cache_control"] = json!({ "type": "ephemeral" });
            }
            body["tools"] = Value::Array(api_tools);
            match request.options.tool_call_mode {
                ToolCallMode::Auto => {}
                ToolCallMode::Required => body["tool_choice"] = json!({ "type": "any" }),
                ToolCallMode::None => body["tool_choice"] = json!({ "type": "none" }),
            }
        }

        crate::chat_completions::merge_options(&mut body, &self.config);
        body
    }
}

/// Whether the latest assistant message requested tools, i.e. this request
/// carries their results back.
fn continues_tool_use(messages: &[Message]) -> bool {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
        .is_some_and(|m| {
            m.content
                .iter()
                .any(|c| matches!(c, MessageContent::ToolUse { .. }))
        })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        // Thinking blocks only stream when extended thinking is requested.
        self.config.enable_thinking
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let api_key = self.api_key()?;
        let (names, tools) = ToolNameMap::advertise(self.naming_rules(), &request.tools);
        let body = self.build_request_body(&request, &names, &tools);

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            thinking = body.get("thinking").is_some(),
            "Streaming Anthropic request"
        );

        let http_request = self
            .client
            .post(self.base_url())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = send_streaming_request(http_request, &request.cancel, "anthropic").await?;

        let mut adapter = AnthropicAdapter::new();
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
        let models_url = self.base_url().replace("/messages", "/models");
        let response = self
            .client
            .get(&models_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(LlmError::network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, "anthropic").await)
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_names::NamingRules;
    use crate::types::{ParameterSchema, ProviderType, ToolCall};
    use std::collections::HashMap;

    fn provider(enable_thinking: bool) -> AnthropicProvider {
        let mut config = ProviderConfig::new(ProviderType::Anthropic, "claude-sonnet-4-20250514")
            .with_api_key("k");
        config.enable_thinking = enable_thinking;
        AnthropicProvider::new(config).unwrap()
    }

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: ParameterSchema::object(None, HashMap::new(), vec![]),
        }
    }

    #[test]
    fn test_body_cache_hints_and_tools() {
        let provider = provider(false);
        let request = StreamRequest::new("s", vec![Message::user("hi")]).with_system("be kind");
        let (names, tools) =
            ToolNameMap::advertise(NamingRules::PERMISSIVE, &[tool("a"), tool("b")]);
        let body = provider.build_request_body(&request, &names, &tools);

        assert_eq!(body["system"][0]["text"], "be kind");
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(body["tools"][0].get("cache_control").is_none());
        assert_eq!(body["tools"][1]["cache_control"]["type"], "ephemeral");
        assert!(body.get("temperature").is_some());
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn test_body_thinking_drops_temperature() {
        let provider = provider(true);
        let request = StreamRequest::new("s", vec![Message::user("hi")]);
        let names = ToolNameMap::new(NamingRules::PERMISSIVE);
        let body = provider.build_request_body(&request, &names, &[]);
        assert_eq!(body["thinking"]["budget_tokens"], DEFAULT_THINKING_BUDGET);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_thinking_withheld_while_tool_loop_continues() {
        let provider = provider(true);
        let call = ToolCall::from_raw_arguments("toolu_1", "a", "{}");
        let mut history = vec![
            Message::user("hi"),
            Message::assistant_tool_calls(None, &[call]),
            Message::tool_result("toolu_1", "done", false),
        ];
        let (names, tools) = ToolNameMap::advertise(NamingRules::PERMISSIVE, &[tool("a")]);

        let request = StreamRequest::new("s", history.clone());
        let body = provider.build_request_body(&request, &names, &tools);
        assert!(body.get("thinking").is_none());
        assert!(body.get("temperature").is_some());
        let replayed = &body["messages"][1]["content"];
        assert_eq!(replayed[0]["type"], "tool_use");

        // Once the loop ends, the next user turn thinks again.
        history.push(Message::assistant("All done"));
        history.push(Message::user("thanks"));
        let request = StreamRequest::new("s", history);
        let body = provider.build_request_body(&request, &names, &tools);
        assert_eq!(body["thinking"]["type"], "enabled");
    }

    #[test]
    fn test_tool_history_conversion() {
        let mut names = ToolNameMap::new(NamingRules::PERMISSIVE);
        names.register("mcp:search");
        let call = ToolCall::from_raw_arguments("toolu_1", "mcp:search", r#"{"q":"x"}"#);
        let assistant = Message::assistant_tool_calls(Some("Looking"), &[call]);
        let converted = AnthropicProvider::message_to_api(&assistant, &names).unwrap();
        assert_eq!(converted["role"], "assistant");
        assert_eq!(converted["content"][1]["name"], "mcp_search");

        let results = Message::tool_result("toolu_1", "boom", true);
        let converted = AnthropicProvider::message_to_api(&results, &names).unwrap();
        assert_eq!(converted["content"][0]["is_error"], true);
    }
}
