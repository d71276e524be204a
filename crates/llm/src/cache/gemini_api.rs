//! Gemini `cachedContents` REST client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{CacheApi, CachedContent, CreateCacheRequest};
use crate::gemini::{system_instruction, to_gemini_contents, tool_names_by_call_id, GEMINI_API_BASE};
use crate::http_client::build_http_client;
use crate::provider::{error_from_response, missing_api_key_error};
use crate::tool_names::{NamingRules, ToolNameMap};
use crate::tool_schema::to_gemini_tools;
use crate::types::{LlmError, LlmResult, ProviderConfig};

/// Drives Gemini's cache resource with the same credentials as the provider.
pub struct GeminiCacheApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiCacheApi {
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error("gemini"))?;
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(GEMINI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.trim_start_matches('/'))
    }

    fn create_body(request: &CreateCacheRequest) -> Value {
        let (names, tools) = ToolNameMap::advertise(NamingRules::STRICT, &request.tools);
        let call_names = tool_names_by_call_id(&request.messages);
        let mut body = json!({
            "model": format!("models/{}", request.model),
            "contents": to_gemini_contents(&request.messages, &call_names, &names),
            "ttl": format!("{}s", request.ttl_secs),
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["systemInstruction"] = system_instruction(system);
        }
        if !tools.is_empty() {
            body["tools"] = to_gemini_tools(&tools);
        }
        body
    }

    async fn parse_entry(response: reqwest::Response) -> LlmResult<CachedContent> {
        if !response.status().is_success() {
            return Err(error_from_response(response, "gemini").await);
        }
        let value: Value = response.json().await.map_err(LlmError::parse)?;
        parse_cached_content(&value)
    }
}

fn parse_cached_content(value: &Value) -> LlmResult<CachedContent> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::parse("cachedContent response has no name"))?;
    let expire_time = value
        .get("expireTime")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::parse("cachedContent response has no expireTime"))?;
    let expire_time = DateTime::parse_from_rfc3339(expire_time)
        .map_err(LlmError::parse)?
        .with_timezone(&Utc);
    let token_count = value
        .pointer("/usageMetadata/totalTokenCount")
        .and_then(Value::as_u64)
        .map(|v| v.min(u32::MAX as u64) as u32);
    Ok(CachedContent {
        name: name.to_string(),
        expire_time,
        token_count,
    })
}

#[async_trait]
impl CacheApi for GeminiCacheApi {
    async fn create(&self, request: &CreateCacheRequest) -> LlmResult<CachedContent> {
        let body = Self::create_body(request);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            ttl_secs = request.ttl_secs,
            "Creating Gemini cached content"
        );
        let response = self
            .client
            .post(self.resource_url("cachedContents"))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::network)?;
        Self::parse_entry(response).await
    }

    async fn get(&self, name: &str) -> LlmResult<CachedContent> {
        let response = self
            .client
            .get(self.resource_url(name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(LlmError::network)?;
        Self::parse_entry(response).await
    }

    async fn patch_ttl(&self, name: &str, ttl_secs: u64) -> LlmResult<CachedContent> {
        let response = self
            .client
            .patch(self.resource_url(name))
            .query(&[("updateMask", "ttl")])
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "ttl": format!("{}s", ttl_secs) }))
            .send()
            .await
            .map_err(LlmError::network)?;
        Self::parse_entry(response).await
    }

    async fn delete(&self, name: &str) -> LlmResult<()> {
        let response = self
            .client
            .delete(self.resource_url(name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(LlmError::network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response, "gemini").await)
        }
    }
}

impl std::fmt::Debug for GeminiCacheApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiCacheApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
