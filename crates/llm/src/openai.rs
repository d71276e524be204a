//! OpenAI Provider
//!
//! Implementation of the LlmProvider trait for OpenAI's chat completions API.
//! Native parallel tool calls; reasoning models (o-series) take
//! `reasoning_effort` instead of `temperature`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat_completions::{build_chat_body, ChatBodyOptions};
use crate::http_client::{build_http_client, send_streaming_request};
use crate::provider::{missing_api_key_error, LlmProvider, StreamRequest};
use crate::stream_driver::drive_stream;
use crate::streaming_adapters::OpenAiCompatAdapter;
use crate::tool_names::{NamingRules, ToolNameMap};
use crate::types::{LlmError, LlmResponse, LlmResult, ProviderConfig};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    /// Get the API base URL
    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("openai"))
    }

    /// Check if model is a reasoning model (o1/o3/o4)
    fn model_supports_reasoning(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        // Reasoning is billed but never streamed back.
        false
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    fn naming_rules(&self) -> NamingRules {
        NamingRules::PERMISSIVE
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
                reasoning_model: self.model_supports_reasoning(),
            },
        );

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Streaming OpenAI request"
        );

        let http_request = self
            .client
            .post(self.base_url())
            .bearer_auth(api_key)
            .json(&body);
        let response = send_streaming_request(http_request, &request.cancel, "openai").await?;

        let mut adapter = OpenAiCompatAdapter::openai();
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
            Err(crate::provider::error_from_response(response, "openai").await)
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
