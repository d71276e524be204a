//! Engine Configuration
//!
//! TOML-backed settings for the loop, retry governor, explicit cache,
//! logging and the named provider profiles. Every field has a default, so
//! an empty file is a valid configuration.
//!
//! ```toml
//! [loop]
//! max_steps = 16
//!
//! [retry]
//! max_retries = 5
//!
//! [providers.fast]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use agent_engine_llm::{CacheConfig, ProviderConfig, ProviderType, RetryConfig};

use crate::error::{EngineError, EngineResult};
use crate::logging::LoggingConfig;

/// Default cap on adapter invocations per turn
pub const DEFAULT_MAX_STEPS: u32 = 32;
/// Hard upper bound for `max_steps`
pub const MAX_STEPS_LIMIT: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_steps: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Clamp a requested step cap into `1..=MAX_STEPS_LIMIT`.
pub fn clamp_max_steps(requested: u32) -> u32 {
    requested.clamp(1, MAX_STEPS_LIMIT)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "loop")]
    pub agent_loop: LoopConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    /// Named provider profiles
    pub providers: HashMap<String, ProviderConfig>,
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from a TOML file and fill missing API keys from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.resolve_api_keys();
        tracing::debug!(
            path = %path.display(),
            providers = config.providers.len(),
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Fill missing API keys from each vendor's conventional variable.
    pub fn resolve_api_keys(&mut self) {
        self.resolve_api_keys_with(|var| std::env::var(var).ok());
    }

    pub fn resolve_api_keys_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, provider) in self.providers.iter_mut() {
            if provider.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
                continue;
            }
            let Some(var) = provider.provider.api_key_env_var() else {
                continue;
            };
            if let Some(key) = lookup(var).filter(|k| !k.is_empty()) {
                tracing::debug!(profile = %name, env = var, "Using API key from environment");
                provider.api_key = Some(key);
            }
        }
    }

    /// Check every setting the engine cannot safely clamp.
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(EngineError::config(format!(
                "retry.jitter_factor must be within 0..=1, got {}",
                self.retry.jitter_factor
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EngineError::config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        if self.cache.enabled && self.cache.ttl_secs <= self.cache.expiry_margin_secs {
            return Err(EngineError::config(
                "cache.ttl_secs must be greater than cache.expiry_margin_secs",
            ));
        }
        for (name, provider) in &self.providers {
            validate_provider(name, provider)?;
        }
        Ok(())
    }

    /// The named provider profile.
    pub fn provider(&self, name: &str) -> EngineResult<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| EngineError::config(format!("unknown provider profile `{}`", name)))
    }

    pub fn max_steps(&self) -> u32 {
        clamp_max_steps(self.agent_loop.max_steps)
    }
}

fn validate_provider(name: &str, provider: &ProviderConfig) -> EngineResult<()> {
    if provider.model.trim().is_empty() {
        return Err(EngineError::config(format!(
            "providers.{}: model must not be empty",
            name
        )));
    }
    if !(0.0..=2.0).contains(&provider.temperature) {
        return Err(EngineError::config(format!(
            "providers.{}: temperature must be within 0..=2, got {}",
            name, provider.temperature
        )));
    }
    if provider.max_tokens == 0 {
        return Err(EngineError::config(format!(
            "providers.{}: max_tokens must be positive",
            name
        )));
    }
    let needs_key = provider.provider != ProviderType::Ollama;
    if needs_key && provider.api_key.as_deref().map_or(true, str::is_empty) {
        return Err(EngineError::config(format!(
            "providers.{}: no API key configured for {} (set api_key or {})",
            name,
            provider.provider,
            provider.provider.api_key_env_var().unwrap_or("an API key")
        )));
    }
    Ok(())
}
