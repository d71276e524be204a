//! Usage Accountant
//!
//! Normalizes every vendor's usage block into one `UsageReport`.
//!
//! Vendors disagree on field names (`input_tokens` vs `prompt_tokens` vs
//! `promptTokenCount`) and on whether cached tokens are part of the prompt
//! count. The canonical report keeps `input_tokens` as the *uncached* part
//! of the prompt, so `total = input + output + cached` never double counts.
//! Reasoning tokens are informational: vendors already bill them inside
//! the output count, or we fold them in when they don't.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_engine_core::streaming::UnifiedStreamEvent;

/// Canonical per-step token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Prompt tokens not served from a cache
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Prompt tokens served from a cache
    pub cached_tokens: u32,
    /// Subset of output spent on reasoning
    pub reasoning_tokens: u32,
    pub total_tokens: u32,
}

impl UsageReport {
    /// Build a report, deriving the total from its components.
    pub fn new(input_tokens: u32, output_tokens: u32, cached_tokens: u32, reasoning_tokens: u32) -> Self {
        let mut report = Self {
            input_tokens,
            output_tokens,
            cached_tokens,
            reasoning_tokens,
            total_tokens: 0,
        };
        report.recompute_total();
        report
    }

    /// Re-derive `total_tokens`. Vendor-supplied totals are never trusted.
    pub fn recompute_total(&mut self) {
        self.total_tokens = self
            .input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cached_tokens);
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cached_tokens == 0
    }

    /// Whether the total equals the sum of its parts.
    pub fn is_consistent(&self) -> bool {
        self.total_tokens as u64
            == self.input_tokens as u64 + self.output_tokens as u64 + self.cached_tokens as u64
    }

    pub fn to_event(&self) -> UnifiedStreamEvent {
        UnifiedStreamEvent::Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cached_tokens: self.cached_tokens,
            reasoning_tokens: self.reasoning_tokens,
            total_tokens: self.total_tokens,
        }
    }

    /// Read back a usage event produced by a normalizer.
    pub fn from_event(event: &UnifiedStreamEvent) -> Option<Self> {
        match event {
            UnifiedStreamEvent::Usage {
                input_tokens,
                output_tokens,
                cached_tokens,
                reasoning_tokens,
                ..
            } => Some(Self::new(
                *input_tokens,
                *output_tokens,
                *cached_tokens,
                *reasoning_tokens,
            )),
            _ => None,
        }
    }
}

const INPUT_FIELDS: &[&str] = &[
    "input_tokens",
    "prompt_tokens",
    "promptTokenCount",
    "prompt_eval_count",
];
const OUTPUT_FIELDS: &[&str] = &[
    "output_tokens",
    "completion_tokens",
    "candidatesTokenCount",
    "eval_count",
];
const CACHED_FIELDS: &[&str] = &[
    "cache_read_input_tokens",
    "cached_tokens",
    "prompt_cache_hit_tokens",
    "cachedContentTokenCount",
];
const REASONING_FIELDS: &[&str] = &["reasoning_tokens", "thoughtsTokenCount"];

/// Anthropic prompt tokens written to its cache on this request.
const CACHE_WRITE_FIELD: &str = "cache_creation_input_tokens";

/// Whether the vendor's prompt count already includes cached tokens.
///
/// Anthropic reports cache reads and cache writes beside `input_tokens`;
/// every other vendor includes them in the prompt count.
fn prompt_includes_cached(usage: &Value) -> bool {
    usage.get("cache_read_input_tokens").is_none() && usage.get(CACHE_WRITE_FIELD).is_none()
}

/// Whether the vendor counts reasoning outside its output figure (Gemini).
fn reasoning_outside_output(usage: &Value) -> bool {
    usage.get("thoughtsTokenCount").is_some()
}

fn first_u32(value: &Value, fields: &[&str]) -> Option<u32> {
    fields
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_u64))
        .map(|v| v.min(u32::MAX as u64) as u32)
}

/// Look for a field at the top level or in the nested `*_details` objects
/// OpenAI-compatible vendors use.
fn find_u32(usage: &Value, fields: &[&str]) -> Option<u32> {
    first_u32(usage, fields).or_else(|| {
        ["prompt_tokens_details", "completion_tokens_details", "input_tokens_details", "output_tokens_details"]
            .iter()
            .filter_map(|details| usage.get(*details))
            .find_map(|details| first_u32(details, fields))
    })
}

/// Normalize a raw vendor usage block.
pub fn normalize_usage(usage: &Value) -> UsageReport {
    let prompt = find_u32(usage, INPUT_FIELDS).unwrap_or(0);
    let mut output = find_u32(usage, OUTPUT_FIELDS).unwrap_or(0);
    let cached = find_u32(usage, CACHED_FIELDS).unwrap_or(0);
    let reasoning = find_u32(usage, REASONING_FIELDS).unwrap_or(0);

    // Cache writes are processed uncached, so they count as input.
    let input = if prompt_includes_cached(usage) {
        prompt.saturating_sub(cached)
    } else {
        prompt.saturating_add(first_u32(usage, &[CACHE_WRITE_FIELD]).unwrap_or(0))
    };
    if reasoning_outside_output(usage) {
        output = output.saturating_add(reasoning);
    }

    UsageReport::new(input, output, cached, reasoning)
}

/// Merges the partial usage chunks one step produces.
///
/// Vendors report cumulative counters (Anthropic splits prompt and output
/// across `message_start`/`message_delta`; Gemini repeats the block on
/// every chunk), so each field keeps its maximum.
#[derive(Debug, Default, Clone)]
pub struct UsageAccumulator {
    current: UsageReport,
    seen: bool,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, partial: &UsageReport) {
        self.seen = true;
        self.current.input_tokens = self.current.input_tokens.max(partial.input_tokens);
        self.current.output_tokens = self.current.output_tokens.max(partial.output_tokens);
        self.current.cached_tokens = self.current.cached_tokens.max(partial.cached_tokens);
        self.current.reasoning_tokens = self.current.reasoning_tokens.max(partial.reasoning_tokens);
        self.current.recompute_total();
    }

    /// Whether any usage chunk arrived.
    pub fn has_usage(&self) -> bool {
        self.seen
    }

    pub fn finish(&self) -> UsageReport {
        self.current
    }
}

/// Turn-level aggregation across steps. Callers own this; the engine only
/// reports per step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub steps: u32,
    pub usage: UsageReport,
}

impl TurnUsage {
    pub fn add(&mut self, step: &UsageReport) {
        self.steps += 1;
        self.usage.input_tokens = self.usage.input_tokens.saturating_add(step.input_tokens);
        self.usage.output_tokens = self.usage.output_tokens.saturating_add(step.output_tokens);
        self.usage.cached_tokens = self.usage.cached_tokens.saturating_add(step.cached_tokens);
        self.usage.reasoning_tokens = self
            .usage
            .reasoning_tokens
            .saturating_add(step.reasoning_tokens);
        self.usage.recompute_total();
    }
}
