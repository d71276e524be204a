//! Configuration Integration Tests
//!
//! Loads engine configuration files from disk and builds a loop from a
//! provider profile.

use std::io::Write;
use std::sync::Arc;

use agent_engine::{AgentLoop, EngineConfig, EngineError, ToolBridge, UnifiedToolRegistry};
use tempfile::NamedTempFile;

const ENGINE_TOML: &str = r#"
[loop]
max_steps = 12

[retry]
max_retries = 4
max_rate_limit_wait_ms = 20000

[cache]
enabled = false

[logging]
level = "agent_engine=debug,info"
json = true

[providers.main]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key = "sk-ant-test"

[providers.local]
provider = "ollama"
model = "qwen3:8b"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn bridge() -> ToolBridge {
    ToolBridge::new(Arc::new(UnifiedToolRegistry::new()))
}

#[test]
fn test_load_from_file() {
    let file = write_config(ENGINE_TOML);
    let config = EngineConfig::from_file(file.path()).unwrap();

    assert_eq!(config.max_steps(), 12);
    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.max_rate_limit_wait_ms, 20_000);
    assert!(!config.cache.enabled);
    assert!(config.logging.json);
    assert_eq!(config.providers.len(), 2);
    config.validate().unwrap();
}

#[test]
fn test_loop_from_profile() {
    let file = write_config(ENGINE_TOML);
    let config = EngineConfig::from_file(file.path()).unwrap();

    let agent = AgentLoop::from_config(&config, "main", bridge()).unwrap();
    assert_eq!(agent.provider().name(), "anthropic");
    assert_eq!(agent.provider().model(), "claude-sonnet-4-20250514");
    assert_eq!(agent.max_steps(), 12);

    let local = AgentLoop::from_config(&config, "local", bridge()).unwrap();
    assert_eq!(local.provider().name(), "ollama");
}

#[test]
fn test_unknown_profile() {
    let config = EngineConfig::from_toml_str(ENGINE_TOML).unwrap();
    let err = AgentLoop::from_config(&config, "missing", bridge()).unwrap_err();
    assert!(matches!(err, EngineError::Config(ref msg) if msg.contains("missing")));
}

#[test]
fn test_step_cap_is_clamped_on_load() {
    let config = EngineConfig::from_toml_str("[loop]\nmax_steps = 1000\n").unwrap();
    assert_eq!(config.max_steps(), agent_engine::MAX_STEPS_LIMIT);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = EngineConfig::from_file("/nonexistent/agent-engine.toml").unwrap_err();
    assert_eq!(err.code(), "config");
}

#[test]
fn test_malformed_toml_is_config_error() {
    let file = write_config("[loop\nmax_steps = ");
    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
