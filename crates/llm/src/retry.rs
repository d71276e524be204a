//! Retry / Rate-Limit Governor
//!
//! Classifies provider failures and decides whether and how long to wait
//! before the next attempt.
//!
//! - **RateLimit**: HTTP 429 or quota/exhaustion phrasing. Waits for the
//!   vendor's hint (header or message), capped at `max_rate_limit_wait_ms`.
//! - **Transient**: 5xx, timeouts, connection resets, DNS failures,
//!   "unavailable". Exponential backoff plus uniform jitter.
//! - Everything else is surfaced immediately.
//!
//! When retries run out the last error is returned unchanged.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::types::{LlmError, LlmResult};

/// Retry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First transient backoff step
    pub base_delay_ms: u64,
    /// Cap on the transient backoff before jitter
    pub max_delay_ms: u64,
    /// Cap on vendor-suggested rate-limit waits
    pub max_rate_limit_wait_ms: u64,
    /// Jitter added on top of a backoff delay, as a fraction of it
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_rate_limit_wait_ms: 60_000,
            jitter_factor: 0.2,
        }
    }
}

/// Failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    RateLimit,
    Transient,
    NotRetryable,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::RateLimit => write!(f, "rate_limit"),
            RetryReason::Transient => write!(f, "transient"),
            RetryReason::NotRetryable => write!(f, "not_retryable"),
        }
    }
}

/// What to do about one failure. Computed fresh per failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub is_retryable: bool,
    pub wait_ms: u64,
    pub reason: RetryReason,
}

impl RetryDecision {
    fn give_up(reason: RetryReason) -> Self {
        Self {
            is_retryable: false,
            wait_ms: 0,
            reason,
        }
    }
}

/// Passed to the notification hook before each wait.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// 1-based retry number
    pub attempt: u32,
    pub max_retries: u32,
    pub wait_ms: u64,
    pub reason: RetryReason,
    pub error: LlmError,
}

/// Caller-supplied hook, e.g. to show "waiting for rate limit".
pub type RetryNotifier = Arc<dyn Fn(&RetryNotice) + Send + Sync>;

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource_exhausted",
    "resource exhausted",
    "exhausted",
];

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "dns",
    "failed to lookup address",
    "name resolution",
    "unavailable",
    "overloaded",
    "bad gateway",
    "gateway timeout",
];

fn contains_any(message: &str, phrases: &[&str]) -> bool {
    let lower = message.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

/// Classify a failure.
pub fn classify_failure(err: &LlmError) -> RetryReason {
    match err {
        LlmError::RateLimited { .. } => RetryReason::RateLimit,
        LlmError::AuthenticationFailed { .. }
        | LlmError::InvalidRequest { .. }
        | LlmError::ModelNotFound { .. }
        | LlmError::ContextLengthExceeded { .. }
        | LlmError::ParseError { .. }
        | LlmError::Cancelled => RetryReason::NotRetryable,
        LlmError::ServerError { message, status } => {
            if contains_any(message, RATE_LIMIT_PHRASES) {
                RetryReason::RateLimit
            } else if status.map_or(true, |s| s >= 500) {
                RetryReason::Transient
            } else {
                RetryReason::NotRetryable
            }
        }
        LlmError::NetworkError { message }
        | LlmError::ProviderUnavailable { message }
        | LlmError::Other { message } => {
            if contains_any(message, RATE_LIMIT_PHRASES) {
                RetryReason::RateLimit
            } else if contains_any(message, TRANSIENT_PHRASES)
                || matches!(
                    err,
                    LlmError::NetworkError { .. } | LlmError::ProviderUnavailable { .. }
                )
            {
                RetryReason::Transient
            } else {
                RetryReason::NotRetryable
            }
        }
    }
}

fn hint_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(?:retry[\s_-]*after|try\s+again\s+in|retry\s+in)[\s:]*(\d+(?:\.\d+)?)\s*(milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m)?",
            r#"(?i)"?retryDelay"?\s*:\s*"(\d+(?:\.\d+)?)(s)""#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Extract a suggested wait from vendor error text.
///
/// Understands "retry after 20 seconds", "try again in 350ms",
/// "Please retry in 17.5s" and Gemini's `"retryDelay": "17s"`. A bare
/// number is read as seconds.
pub fn parse_retry_hint_ms(message: &str) -> Option<u64> {
    hint_patterns().iter().find_map(|re| {
        let caps = re.captures(message)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let multiplier = if unit.starts_with("ms") || unit.starts_with("milli") {
            1.0
        } else if unit.starts_with('m') {
            60_000.0
        } else {
            1_000.0
        };
        Some((value * multiplier).round() as u64)
    })
}

/// Parse a `Retry-After` header value given in (possibly fractional) seconds.
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs >= 0.0).then(|| (secs * 1_000.0).round() as u64)
}

/// Stateless governor; share it freely.
#[derive(Debug, Clone, Default)]
pub struct RetryGovernor {
    config: RetryConfig,
}

impl RetryGovernor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide how to handle a failure on the given 0-based retry index.
    pub fn decide(&self, err: &LlmError, retry_index: u32) -> RetryDecision {
        let reason = classify_failure(err);
        if reason == RetryReason::NotRetryable || retry_index >= self.config.max_retries {
            return RetryDecision::give_up(reason);
        }

        let wait_ms = match reason {
            RetryReason::RateLimit => {
                let hinted = match err {
                    LlmError::RateLimited {
                        retry_after_ms: Some(ms),
                        ..
                    } => Some(*ms),
                    _ => None,
                }
                .or_else(|| parse_retry_hint_ms(&err.message()));
                match hinted {
                    Some(ms) => ms.min(self.config.max_rate_limit_wait_ms),
                    None => self
                        .backoff_ms(retry_index)
                        .min(self.config.max_rate_limit_wait_ms),
                }
            }
            _ => self.backoff_ms(retry_index),
        };

        RetryDecision {
            is_retryable: true,
            wait_ms,
            reason,
        }
    }

    /// Exponential backoff with uniform jitter in `[0, jitter_factor * delay]`.
    fn backoff_ms(&self, retry_index: u32) -> u64 {
        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << retry_index.min(20));
        let delay = exp.min(self.config.max_delay_ms);
        let jitter_span = (delay as f64 * self.config.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(0..=jitter_span)
        } else {
            0
        };
        delay + jitter
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        notify: Option<&RetryNotifier>,
        op: F,
    ) -> LlmResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        self.run_guarded(cancel, notify, op, |_| true).await
    }

    /// Like [`run`](Self::run), but `may_retry` can veto a retry for a
    /// specific failure (e.g. when the attempt already streamed output).
    pub async fn run_guarded<T, F, Fut, G>(
        &self,
        cancel: &CancellationToken,
        notify: Option<&RetryNotifier>,
        mut op: F,
        may_retry: G,
    ) -> LlmResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = LlmResult<T>>,
        G: Fn(&LlmError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let decision = self.decide(&err, attempt);
            if !decision.is_retryable || !may_retry(&err) {
                if decision.is_retryable {
                    tracing::debug!(error = %err, "Retry vetoed after partial output");
                } else if attempt > 0 {
                    tracing::warn!(
                        attempts = attempt + 1,
                        reason = %decision.reason,
                        error = %err,
                        "Giving up after retries"
                    );
                }
                return Err(err);
            }

            attempt += 1;
            tracing::warn!(
                attempt,
                max_retries = self.config.max_retries,
                wait_ms = decision.wait_ms,
                reason = %decision.reason,
                error = %err,
                "Provider call failed, retrying"
            );
            if let Some(notify) = notify {
                notify(&RetryNotice {
                    attempt,
                    max_retries: self.config.max_retries,
                    wait_ms: decision.wait_ms,
                    reason: decision.reason,
                    error: err.clone(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(decision.wait_ms)) => {}
            }
        }
    }
}
