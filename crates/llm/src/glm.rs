//! GLM Provider
//!
//! Zhipu AI chat completions (OpenAI-compatible). GLM-4.5 and later can
//! reason; when thinking is enabled the reasoning streams in
//! `reasoning_content`.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::chat_completions::{build_chat_body, ChatBodyOptions};
use crate::http_client::{build_http_client, send_streaming_request};
use crate::provider::{error_from_response, missing_api_key_error, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::OpenAiCompatAdapter;
use crate::tool_names::ToolNameMap;
use crate::types::{LlmError, LlmResponse, LlmResult, ProviderConfig, ToolCallMode};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default GLM API endpoint
const GLM_API_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

pub struct GlmProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GlmProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(GLM_API_URL)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("glm"))
    }

    /// Check if model supports reasoning (GLM-4.5+ and thinking variants)
    fn model_supports_reasoning(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.contains("4.5")
            || model.contains("4.6")
            || model.contains("4.7")
            || model.contains("thinking")
    }

    /// Tool argument streaming is documented for GLM-4.6 / GLM-4.7.
    fn model_supports_tool_stream(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.contains("4.6") || model.contains("4.7")
    }

    fn thinking_active(&self) -> bool {
        self.config.enable_thinking && self.model_supports_reasoning()
    }
}

#[async_trait]
impl LlmProvider for GlmProvider {
    fn name(&self) -> &'static str {
        "glm"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        self.model_supports_reasoning()
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let api_key = self.api_key()?;
        let (names, tools) = ToolNameMap::advertise(self.naming_rules(), &request.tools);
        let mut body = build_chat_body(
            &self.config,
            &request,
            &names,
            &tools,
            ChatBodyOptions {
                include_usage: true,
                reasoning_model: false,
            },
        );

        if self.model_supports_reasoning() {
            let mode = if self.thinking_active() { "enabled" } else { "disabled" };
            body["thinking"] = json!({ "type": mode });
        }
        if !tools.is_empty() {
            // GLM thinking models reject a forced tool choice.
            if self.thinking_active() && request.options.tool_call_mode == ToolCallMode::Required {
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("tool_choice");
                }
            }
            if self.model_supports_tool_stream() {
                body["tool_stream"] = json!(true);
            }
        }

        tracing::debug!(
            model = %self.config.model,
            thinking = self.thinking_active(),
            tools = tools.len(),
            "Streaming GLM request"
        );

        let http_request = self
            .client
            .post(self.base_url())
            .bearer_auth(api_key)
            .json(&body);
        let response = send_streaming_request(http_request, &request.cancel, "glm").await?;

        let mut adapter = OpenAiCompatAdapter::glm();
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
        // GLM has no public model listing; a one-token completion is the cheapest probe.
        let api_key = self.api_key()?;
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": "ping" }],
            "max_tokens": 1,
        });
        let response = self
            .client
            .post(self.base_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, "glm").await)
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderType;

    fn provider(model: &str) -> GlmProvider {
        GlmProvider::new(ProviderConfig::new(ProviderType::Glm, model).with_api_key("k")).unwrap()
    }

    #[test]
    fn test_reasoning_detection() {
        assert!(!provider("glm-4-plus").supports_thinking());
        assert!(provider("glm-4.6").supports_thinking());
        assert!(provider("glm-4.1v-thinking-flash").supports_thinking());
    }

    #[test]
    fn test_tool_stream_detection() {
        assert!(provider("glm-4.7").model_supports_tool_stream());
        assert!(!provider("glm-4.5").model_supports_tool_stream());
    }

    #[test]
    fn test_thinking_requires_opt_in() {
        let mut config = ProviderConfig::new(ProviderType::Glm, "glm-4.6");
        assert!(!GlmProvider::new(config.clone()).unwrap().thinking_active());
        config.enable_thinking = true;
        assert!(GlmProvider::new(config).unwrap().thinking_active());
    }
}
