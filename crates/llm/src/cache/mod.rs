//! Explicit (vendor-side) prompt caching.
//!
//! Gemini can store a conversation prefix server-side and bill later
//! requests that reference it at a reduced rate. [`ExplicitCacheManager`]
//! decides when to build, reuse, extend or replace those entries;
//! [`CacheApi`] is the vendor surface it drives.

pub mod gemini_api;
pub mod manager;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LlmResult, Message, ToolDefinition};

pub use gemini_api::GeminiCacheApi;
pub use manager::{
    CacheConfig, CacheEntry, CacheFailure, CacheFailureNotifier, CacheHit, Clock,
    ExplicitCacheManager, SystemClock,
};

/// What to store in a new cache entry.
#[derive(Debug, Clone)]
pub struct CreateCacheRequest {
    pub model: String,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    /// Prefix messages, oldest first
    pub messages: Vec<Message>,
    pub ttl_secs: u64,
}

/// A vendor-side cache entry as reported by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedContent {
    /// Vendor resource name, e.g. `cachedContents/abc123`
    pub name: String,
    pub expire_time: DateTime<Utc>,
    /// Token count the vendor measured, when reported
    pub token_count: Option<u32>,
}

/// Cache management API.
#[async_trait]
pub trait CacheApi: Send + Sync {
    async fn create(&self, request: &CreateCacheRequest) -> LlmResult<CachedContent>;

    /// Fetch an entry's current metadata.
    async fn get(&self, name: &str) -> LlmResult<CachedContent>;

    /// Set a new time-to-live, counted from now.
    async fn patch_ttl(&self, name: &str, ttl_secs: u64) -> LlmResult<CachedContent>;

    async fn delete(&self, name: &str) -> LlmResult<()>;
}
