//! Agent Engine
//!
//! A vendor-agnostic agent execution engine. One turn runs as a bounded
//! loop of provider invocations and tool executions, surfaced to the
//! caller as a single ordered stream of `UnifiedStreamEvent`s.
//!
//! ## Crate Organization
//!
//! - `agent_engine_core` - tool contract, tool context, stream events
//! - `agent_engine_llm` - provider adapters, streaming normalizer, explicit
//!   cache, retry governor, usage accounting
//! - `agent_engine_tools` - tool bridge (dispatch, validation, result shrinking)
//! - this crate - the agentic loop, configuration, logging, error taxonomy

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;

// ── Engine ─────────────────────────────────────────────────────────────
pub use config::{clamp_max_steps, EngineConfig, LoopConfig, DEFAULT_MAX_STEPS, MAX_STEPS_LIMIT};
pub use error::{EngineError, EngineResult};
pub use logging::{init_logging, LoggingConfig, LOG_ENV_VAR};
pub use orchestrator::{
    dispatch_event, pump_events, AgentLoop, AgentStep, TurnCallbacks, TurnHandle, TurnOutcome,
    TurnRequest, MAX_STEPS_STOP_REASON,
};

// ── Workspace Crates ───────────────────────────────────────────────────
pub use agent_engine_core::{ToolContext, UnifiedStreamEvent, UnifiedTool, UnifiedToolRegistry};
pub use agent_engine_llm::{LlmProvider, Message, ProviderConfig, ProviderType, RetryConfig};
pub use agent_engine_tools::{ToolBridge, ToolCallResult};
