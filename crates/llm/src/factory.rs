//! Provider Factory
//!
//! Maps a `ProviderType` to its concrete adapter.

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::cache::{CacheConfig, CacheFailureNotifier, ExplicitCacheManager, GeminiCacheApi};
use crate::deepseek::DeepSeekProvider;
use crate::gemini::GeminiProvider;
use crate::glm::GlmProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAIProvider;
use crate::provider::LlmProvider;
use crate::types::{LlmResult, ProviderConfig, ProviderType};

/// Create an LLM provider from a ProviderConfig.
///
/// `cache` configures explicit caching for vendors that support it (Gemini);
/// it is ignored elsewhere.
pub fn create_provider(
    config: ProviderConfig,
    cache: Option<&CacheConfig>,
) -> LlmResult<Arc<dyn LlmProvider>> {
    create_provider_with(config, cache, None)
}

/// [`create_provider`], reporting cache creation failures to `on_cache_failure`.
pub fn create_provider_with(
    config: ProviderConfig,
    cache: Option<&CacheConfig>,
    on_cache_failure: Option<CacheFailureNotifier>,
) -> LlmResult<Arc<dyn LlmProvider>> {
    tracing::debug!(provider = %config.provider, model = %config.model, "Creating provider");
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
        ProviderType::DeepSeek => Arc::new(DeepSeekProvider::new(config)?),
        ProviderType::Glm => Arc::new(GlmProvider::new(config)?),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config)?),
        ProviderType::Gemini => {
            let cache = match cache.filter(|c| c.enabled) {
                Some(cache_config) => {
                    let api = Arc::new(GeminiCacheApi::new(&config)?);
                    let manager = ExplicitCacheManager::new(api, cache_config.clone());
                    Some(Arc::new(match on_cache_failure {
                        Some(notifier) => manager.with_failure_notifier(notifier),
                        None => manager,
                    }))
                }
                None => None,
            };
            let provider = GeminiProvider::new(config)?;
            match cache {
                Some(manager) => Arc::new(provider.with_cache(manager)),
                None => Arc::new(provider),
            }
        }
    };
    Ok(provider)
}
