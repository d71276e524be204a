//! LLM Provider Trait
//!
//! Defines the common interface every vendor adapter implements, plus the
//! HTTP error mapping they share.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::retry::{parse_retry_after_header, parse_retry_hint_ms};
use crate::tool_names::NamingRules;
use crate::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ToolDefinition,
};
use agent_engine_core::streaming::UnifiedStreamEvent;

/// Everything one adapter invocation needs.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Scopes explicit cache entries
    pub session_id: String,
    /// Conversation history, oldest first
    pub messages: Vec<Message>,
    pub system: Option<String>,
    /// Tools under their original names
    pub tools: Vec<ToolDefinition>,
    pub options: LlmRequestOptions,
    /// Polled while consuming the stream. The HTTP request itself is not
    /// aborted server-side; its response is simply dropped.
    pub cancel: CancellationToken,
}

impl StreamRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            system: None,
            tools: Vec::new(),
            options: LlmRequestOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Returns whether this provider surfaces reasoning for the configured model.
    fn supports_thinking(&self) -> bool;

    /// Returns whether this provider supports tool calling.
    fn supports_tools(&self) -> bool;

    /// Whether one response may carry several tool calls that are safe to
    /// execute concurrently.
    ///
    /// Vendors without it may depend on per-call continuation state, so
    /// their calls run strictly one after another.
    fn supports_parallel_tool_calls(&self) -> bool {
        false
    }

    /// The vendor's tool-name constraints.
    fn naming_rules(&self) -> NamingRules {
        NamingRules::PERMISSIVE
    }

    /// Stream one response.
    ///
    /// Text and reasoning deltas are forwarded on `tx` as they arrive. Tool
    /// calls, usage and the stop reason are collected into the returned
    /// `LlmResponse`; the caller decides how to surface them.
    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse>;

    /// Check if the provider is reachable and the credentials are accepted.
    async fn health_check(&self) -> LlmResult<()>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Pull the human-readable message out of a vendor error envelope.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is returned verbatim.
pub fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    value
        .get("error")
        .and_then(|e| e.get("message").and_then(|m| m.as_str()).or_else(|| e.as_str()))
        .or_else(|| value.get("message").and_then(|m| m.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

fn looks_like_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["context length", "context_length", "maximum context", "prompt is too long", "too many tokens"]
        .iter()
        .any(|p| lower.contains(p))
}

/// Helper function to map an HTTP error status and body to an `LlmError`.
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    let message = extract_error_message(body);
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound { model: message },
        408 => LlmError::NetworkError {
            message: format!("{}: request timeout", provider),
        },
        429 => LlmError::RateLimited {
            retry_after_ms: parse_retry_hint_ms(body),
            message,
        },
        400 | 413 | 422 if looks_like_context_overflow(&message) => {
            LlmError::ContextLengthExceeded { message }
        }
        400 | 413 | 422 => LlmError::InvalidRequest { message },
        500..=599 => LlmError::ServerError {
            message,
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, message),
        },
    }
}

/// Consume a non-success response into an `LlmError`, honoring
/// `retry-after-ms` / `retry-after` headers on rate limits.
pub async fn error_from_response(response: reqwest::Response, provider: &str) -> LlmError {
    let status = response.status().as_u16();
    let header_wait = response
        .headers()
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| {
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_header)
        });
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return LlmError::network(e),
    };

    let mut err = parse_http_error(status, &body, provider);
    if let LlmError::RateLimited { retry_after_ms, .. } = &mut err {
        if header_wait.is_some() {
            *retry_after_ms = header_wait;
        }
    }
    tracing::debug!(provider, status, error = %err, "Provider returned HTTP error");
    err
}
