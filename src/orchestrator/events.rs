//! Callback-style consumption of a turn's event stream.
//!
//! Callers that prefer hooks over matching on `UnifiedStreamEvent`
//! implement [`TurnCallbacks`] and feed the receiver through
//! [`dispatch_event`] or [`pump_events`].

use tokio::sync::mpsc;

use agent_engine_core::streaming::UnifiedStreamEvent;
use agent_engine_llm::UsageReport;

/// Turn lifecycle hooks. Every method defaults to a no-op.
pub trait TurnCallbacks: Send + Sync {
    fn on_text_chunk(&self, _text: &str) {}

    fn on_reasoning_chunk(&self, _text: &str) {}

    fn on_tool_start(&self, _call_id: &str, _tool_name: &str, _arguments: &str) {}

    fn on_tool_end(
        &self,
        _call_id: &str,
        _tool_name: &str,
        _result: &str,
        _preview_key: Option<&str>,
    ) {
    }

    fn on_tool_error(&self, _call_id: &str, _tool_name: &str, _error: &str) {}

    fn on_usage(&self, _usage: &UsageReport) {}

    fn on_step(&self, _step_index: u32, _tool_calls: u32, _stop_reason: Option<&str>) {}

    fn on_done(&self, _stop_reason: Option<&str>) {}

    fn on_error(&self, _message: &str, _code: Option<&str>) {}
}

/// Route one event to its hook. Normalizer-internal `tool_call` events
/// are ignored.
pub fn dispatch_event(callbacks: &dyn TurnCallbacks, event: &UnifiedStreamEvent) {
    match event {
        UnifiedStreamEvent::TextDelta { content } => callbacks.on_text_chunk(content),
        UnifiedStreamEvent::ThinkingDelta { content } => callbacks.on_reasoning_chunk(content),
        UnifiedStreamEvent::ToolStart {
            tool_id,
            tool_name,
            arguments,
        } => callbacks.on_tool_start(tool_id, tool_name, arguments),
        UnifiedStreamEvent::ToolCall { .. } => {}
        UnifiedStreamEvent::ToolResult {
            tool_id,
            tool_name,
            result,
            preview_key,
        } => callbacks.on_tool_end(tool_id, tool_name, result, preview_key.as_deref()),
        UnifiedStreamEvent::ToolError {
            tool_id,
            tool_name,
            error,
        } => callbacks.on_tool_error(tool_id, tool_name, error),
        UnifiedStreamEvent::StepFinish {
            step_index,
            tool_calls,
            stop_reason,
        } => callbacks.on_step(*step_index, *tool_calls, stop_reason.as_deref()),
        UnifiedStreamEvent::Usage { .. } => {
            if let Some(usage) = UsageReport::from_event(event) {
                callbacks.on_usage(&usage);
            }
        }
        UnifiedStreamEvent::Complete { stop_reason } => callbacks.on_done(stop_reason.as_deref()),
        UnifiedStreamEvent::Error { message, code } => callbacks.on_error(message, code.as_deref()),
    }
}

/// Drain `rx` into `callbacks` until the turn's sender is dropped.
pub async fn pump_events(mut rx: mpsc::Receiver<UnifiedStreamEvent>, callbacks: &dyn TurnCallbacks) {
    while let Some(event) = rx.recv().await {
        dispatch_event(callbacks, &event);
    }
}
