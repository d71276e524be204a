//! Logging initialization on top of `tracing-subscriber`.
//!
//! The library crates only emit `tracing` events; embedding applications
//! either install their own subscriber or call [`init_logging`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{EngineError, EngineResult};

/// Environment variable that overrides the configured filter
pub const LOG_ENV_VAR: &str = "AGENT_ENGINE_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `agent_engine_llm=debug,info`
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text
    pub json: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// The effective filter: `AGENT_ENGINE_LOG` when set, else `level`.
    pub fn filter(&self) -> EngineResult<EnvFilter> {
        let directive = std::env::var(LOG_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.level.clone());
        EnvFilter::try_new(&directive)
            .map_err(|e| EngineError::config(format!("invalid log filter `{}`: {}", directive, e)))
    }
}

/// Install the global subscriber.
///
/// Fails when the filter is invalid or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> EngineResult<()> {
    let filter = config.filter()?;
    let (text, json) = if config.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            ),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_target(config.with_target)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| EngineError::config(format!("logging already initialized: {}", e)))
}
