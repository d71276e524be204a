//! HTTP Client Factory
//!
//! Builds the `reqwest::Client` every provider and the cache API share.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::error_from_response;
use crate::types::{LlmError, LlmResult, ProviderConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build a `reqwest::Client` with the provider's request timeout.
pub fn build_http_client(config: &ProviderConfig) -> LlmResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .user_agent(concat!("agent-engine/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LlmError::Other {
            message: format!("failed to build HTTP client: {}", e),
        })
}

/// Send a request, racing it against `cancel`.
///
/// Non-success statuses are turned into `LlmError`s so callers only ever see
/// a response whose body is the stream.
pub async fn send_streaming_request(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
    provider: &str,
) -> LlmResult<reqwest::Response> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        response = request.send() => response.map_err(LlmError::network)?,
    };
    if !response.status().is_success() {
        return Err(error_from_response(response, provider).await);
    }
    Ok(response)
}
