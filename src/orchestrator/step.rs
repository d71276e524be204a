//! Per-step record of a turn.

use serde::Serialize;

use agent_engine_llm::{StopReason, ToolCall, UsageReport};
use agent_engine_tools::ToolCallResult;

use crate::error::EngineError;

/// Everything one adapter invocation produced.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    /// 1-based
    pub step_index: u32,
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    /// In call order. Empty when the step ended the turn, including at the step cap.
    pub tool_results: Vec<ToolCallResult>,
    pub usage: UsageReport,
    pub stop_reason: StopReason,
}

impl AgentStep {
    pub fn requested_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Failed calls, in call order.
    pub fn tool_errors(&self) -> Vec<EngineError> {
        self.tool_results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err())
            .map(EngineError::from)
            .collect()
    }
}
