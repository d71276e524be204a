//! DeepSeek Provider
//!
//! OpenAI-compatible chat completions. Supports deepseek-chat and the
//! reasoning models (deepseek-reasoner, R1), whose chain of thought arrives
//! in `reasoning_content` or inline `<think>` tags.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat_completions::{build_chat_body, ChatBodyOptions};
use crate::http_client::{build_http_client, send_streaming_request};
use crate::provider::{error_from_response, missing_api_key_error, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::openai_compat::deepseek_model_reasons;
use crate::streaming_adapters::OpenAiCompatAdapter;
use crate::tool_names::ToolNameMap;
use crate::types::{LlmError, LlmResponse, LlmResult, ProviderConfig};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default DeepSeek API endpoint
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";

pub struct DeepSeekProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl DeepSeekProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEEPSEEK_API_URL)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("deepseek"))
    }
}

#[async_trait]
impl LlmProvider for DeepSeekProvider {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        deepseek_model_reasons(&self.config.model)
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
        let body = build_chat_body(
            &self.config,
            &request,
            &names,
            &tools,
            ChatBodyOptions {
                include_usage: true,
                reasoning_model: false,
            },
        );

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Streaming DeepSeek request"
        );

        let http_request = self
            .client
            .post(self.base_url())
            .bearer_auth(api_key)
            .json(&body);
        let response = send_streaming_request(http_request, &request.cancel, "deepseek").await?;

        let mut adapter = OpenAiCompatAdapter::deepseek(&self.config.model);
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
        let models_url = self.base_url().replace("/chat/completions", "/models");
        let response = self
            .client
            .get(&models_url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(LlmError::network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, "deepseek").await)
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
