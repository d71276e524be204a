//! Explicit Cache Manager
//!
//! Keeps at most one vendor cache entry per (session, model). The cacheable
//! prefix is the system prompt, the tool definitions and every history
//! message except the last. An entry stays usable while it has not expired
//! and the current history still starts with the messages it covers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{CacheApi, CachedContent, CreateCacheRequest};
use crate::types::{LlmError, Message, ToolDefinition};

/// Explicit cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Prefixes estimated below this are not worth caching
    pub min_tokens: u32,
    pub ttl_secs: u64,
    /// Uncached prefix growth that triggers a rebuild
    pub refresh_threshold_tokens: u32,
    /// Entries expiring within this window get their TTL extended
    pub extend_window_secs: u64,
    /// Entries this close to expiry are treated as expired
    pub expiry_margin_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_tokens: 2048,
            ttl_secs: 3600,
            refresh_threshold_tokens: 8192,
            extend_window_secs: 300,
            expiry_margin_secs: 60,
        }
    }
}

/// Time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One live vendor cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_id: String,
    pub model: String,
    pub content_hash: String,
    pub token_count: u32,
    /// Number of leading history messages the entry covers
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fresh_tokens_since_build: u32,
}

/// What a request may reference: send `cache_id` plus the messages from
/// `message_count` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub cache_id: String,
    pub message_count: usize,
}

impl From<&CacheEntry> for CacheHit {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            cache_id: entry.cache_id.clone(),
            message_count: entry.message_count,
        }
    }
}

/// A vendor refusal to create a cache entry. The request that triggered
/// it goes out uncached.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFailure {
    pub session_id: String,
    pub model: String,
    pub error: LlmError,
}

/// Called whenever cache creation fails, in place of the default warning.
pub type CacheFailureNotifier = Arc<dyn Fn(&CacheFailure) + Send + Sync>;

type SlotKey = (String, String);
type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(chars: usize) -> u32 {
    chars.div_ceil(4).min(u32::MAX as usize) as u32
}

fn messages_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

fn prefix_chars(system: Option<&str>, tools: &[ToolDefinition], messages: &[Message]) -> usize {
    let tool_chars: usize = tools
        .iter()
        .map(|t| serde_json::to_string(t).map(|s| s.len()).unwrap_or(0))
        .sum();
    system.map_or(0, str::len) + tool_chars + messages_chars(messages)
}

/// SHA-256 over model, system, tool definitions and messages.
pub fn content_hash(
    model: &str,
    system: Option<&str>,
    tools: &[ToolDefinition],
    messages: &[Message],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(system.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    for tool in tools {
        hasher.update(serde_json::to_vec(tool).unwrap_or_default());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    for message in messages {
        hasher.update(serde_json::to_vec(message).unwrap_or_default());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Decides when vendor cache entries are built, reused, extended and replaced.
pub struct ExplicitCacheManager {
    api: Arc<dyn CacheApi>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    slots: DashMap<SlotKey, Slot>,
    notifier: Option<CacheFailureNotifier>,
}

impl ExplicitCacheManager {
    pub fn new(api: Arc<dyn CacheApi>, config: CacheConfig) -> Self {
        Self::with_clock(api, config, Arc::new(SystemClock))
    }

    pub fn with_clock(api: Arc<dyn CacheApi>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            config,
            clock,
            slots: DashMap::new(),
            notifier: None,
        }
    }

    pub fn with_failure_notifier(mut self, notifier: CacheFailureNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn slot(&self, session_id: &str, model: &str) -> Slot {
        self.slots
            .entry((session_id.to_string(), model.to_string()))
            .or_default()
            .clone()
    }

    /// Current entry for (session, model), if any.
    pub async fn entry(&self, session_id: &str, model: &str) -> Option<CacheEntry> {
        let slot = self.slot(session_id, model);
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Ask the vendor about the current entry.
    pub async fn inspect(
        &self,
        session_id: &str,
        model: &str,
    ) -> crate::types::LlmResult<Option<CachedContent>> {
        let Some(entry) = self.entry(session_id, model).await else {
            return Ok(None);
        };
        self.api.get(&entry.cache_id).await.map(Some)
    }

    /// Drop the entry for (session, model) and delete it vendor-side.
    pub async fn invalidate(&self, session_id: &str, model: &str) {
        let slot = self.slot(session_id, model);
        let mut guard = slot.lock().await;
        if let Some(old) = guard.take() {
            self.delete_quietly(&old).await;
        }
    }

    /// Find or build a cache entry for this request.
    ///
    /// Returns `None` when the request should go out uncached: caching is
    /// disabled, the prefix is too small, or the vendor refused to create an
    /// entry. Never fails the request.
    pub async fn prepare(
        &self,
        session_id: &str,
        model: &str,
        system: Option<&str>,
        tools: &[ToolDefinition],
        messages: &[Message],
    ) -> Option<CacheHit> {
        if !self.config.enabled || messages.len() < 2 {
            return None;
        }
        let prefix = &messages[..messages.len() - 1];
        let now = self.clock.now();

        let slot = self.slot(session_id, model);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_mut() {
            if self.still_valid(entry, model, system, tools, prefix, now) {
                let fresh = estimate_tokens(messages_chars(&prefix[entry.message_count..]));
                entry.fresh_tokens_since_build = fresh;

                if fresh <= self.config.refresh_threshold_tokens {
                    self.extend_if_expiring(entry, now).await;
                    tracing::debug!(
                        session_id,
                        model,
                        cache_id = %entry.cache_id,
                        covered = entry.message_count,
                        fresh_tokens = fresh,
                        "Reusing explicit cache entry"
                    );
                    return Some(CacheHit::from(&*entry));
                }

                tracing::debug!(
                    session_id,
                    model,
                    fresh_tokens = fresh,
                    threshold = self.config.refresh_threshold_tokens,
                    "Uncached prefix grew past threshold; rebuilding cache"
                );
                return match self.build(session_id, model, system, tools, prefix, now).await {
                    Some(new_entry) => {
                        let old = std::mem::replace(entry, new_entry);
                        self.delete_quietly(&old).await;
                        Some(CacheHit::from(&*entry))
                    }
                    // Keep serving from the old entry.
                    None => Some(CacheHit::from(&*entry)),
                };
            }
        }

        if let Some(stale) = guard.take() {
            if stale.expires_at > now {
                self.delete_quietly(&stale).await;
            }
        }

        let estimated = estimate_tokens(prefix_chars(system, tools, prefix));
        if estimated < self.config.min_tokens {
            tracing::trace!(
                session_id,
                model,
                estimated,
                min_tokens = self.config.min_tokens,
                "Prefix below cache threshold"
            );
            return None;
        }

        let entry = self.build(session_id, model, system, tools, prefix, now).await?;
        let hit = CacheHit::from(&entry);
        *guard = Some(entry);
        Some(hit)
    }

    fn still_valid(
        &self,
        entry: &CacheEntry,
        model: &str,
        system: Option<&str>,
        tools: &[ToolDefinition],
        prefix: &[Message],
        now: DateTime<Utc>,
    ) -> bool {
        let margin = Duration::seconds(self.config.expiry_margin_secs as i64);
        if entry.expires_at - margin <= now {
            tracing::debug!(cache_id = %entry.cache_id, "Explicit cache entry expired");
            return false;
        }
        if prefix.len() < entry.message_count {
            return false;
        }
        let matches = content_hash(model, system, tools, &prefix[..entry.message_count])
            == entry.content_hash;
        if !matches {
            tracing::debug!(
                cache_id = %entry.cache_id,
                "Cached prefix no longer matches history; invalidating"
            );
        }
        matches
    }

    async fn extend_if_expiring(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        let window = Duration::seconds(self.config.extend_window_secs as i64);
        if entry.expires_at - now > window {
            return;
        }
        match self.api.patch_ttl(&entry.cache_id, self.config.ttl_secs).await {
            Ok(updated) => {
                tracing::debug!(
                    cache_id = %entry.cache_id,
                    expires_at = %updated.expire_time,
                    "Extended explicit cache TTL"
                );
                entry.expires_at = updated.expire_time;
            }
            Err(e) => {
                tracing::warn!(cache_id = %entry.cache_id, error = %e, "Failed to extend cache TTL");
            }
        }
    }

    async fn build(
        &self,
        session_id: &str,
        model: &str,
        system: Option<&str>,
        tools: &[ToolDefinition],
        prefix: &[Message],
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let request = CreateCacheRequest {
            model: model.to_string(),
            system: system.map(str::to_string),
            tools: tools.to_vec(),
            messages: prefix.to_vec(),
            ttl_secs: self.config.ttl_secs,
        };
        match self.api.create(&request).await {
            Ok(created) => {
                let token_count = created
                    .token_count
                    .unwrap_or_else(|| estimate_tokens(prefix_chars(system, tools, prefix)));
                tracing::info!(
                    model,
                    cache_id = %created.name,
                    messages = prefix.len(),
                    token_count,
                    "Created explicit cache entry"
                );
                Some(CacheEntry {
                    cache_id: created.name,
                    model: model.to_string(),
                    content_hash: content_hash(model, system, tools, prefix),
                    token_count,
                    message_count: prefix.len(),
                    created_at: now,
                    expires_at: created.expire_time,
                    fresh_tokens_since_build: 0,
                })
            }
            Err(e) => {
                match &self.notifier {
                    Some(notify) => notify(&CacheFailure {
                        session_id: session_id.to_string(),
                        model: model.to_string(),
                        error: e,
                    }),
                    None => {
                        tracing::warn!(session_id, model, error = %e, "Explicit cache creation failed; continuing uncached")
                    }
                }
                None
            }
        }
    }

    async fn delete_quietly(&self, entry: &CacheEntry) {
        if let Err(e) = self.api.delete(&entry.cache_id).await {
            tracing::debug!(cache_id = %entry.cache_id, error = %e, "Failed to delete replaced cache entry");
        }
    }
}

impl std::fmt::Debug for ExplicitCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplicitCacheManager")
            .field("config", &self.config)
            .field("slots", &self.slots.len())
            .field("has_failure_notifier", &self.notifier.is_some())
            .finish()
    }
}
