//! Agent Engine LLM
//!
//! Provides a unified streaming interface over multiple LLM vendors:
//! - Anthropic
//! - OpenAI (GPT-4o, o1, o3, o4)
//! - Gemini (with explicit prefix caching)
//! - DeepSeek
//! - GLM (ZhipuAI)
//! - Ollama (local inference)
//!
//! Also includes the per-vendor stream normalizers, tool-name
//! sanitization, the retry governor and the usage accountant.

pub mod anthropic;
pub mod cache;
mod chat_completions;
pub mod deepseek;
pub mod factory;
pub mod gemini;
pub mod glm;
pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod stream_driver;
pub mod streaming_adapters;
pub mod tool_names;
pub mod tool_schema;
pub mod types;
pub mod usage;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use cache::{
    CacheApi, CacheConfig, CacheFailure, CacheFailureNotifier, CacheHit, ExplicitCacheManager,
    GeminiCacheApi,
};
pub use deepseek::DeepSeekProvider;
pub use factory::{create_provider, create_provider_with};
pub use gemini::GeminiProvider;
pub use glm::GlmProvider;
pub use http_client::build_http_client;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::{LlmProvider, StreamRequest};
pub use retry::{
    classify_failure, RetryConfig, RetryDecision, RetryGovernor, RetryNotice, RetryNotifier,
    RetryReason,
};
pub use stream_driver::drive_stream;
pub use tool_names::{NameCollision, NamingRules, ToolNameMap};
pub use types::*;
pub use usage::{normalize_usage, TurnUsage, UsageAccumulator, UsageReport};

// Re-export streaming adapters
pub use streaming_adapters::{
    AnthropicAdapter, ArtifactFilter, GeminiAdapter, LiteralArtifactFilter, OllamaAdapter,
    OpenAiCompatAdapter,
};
