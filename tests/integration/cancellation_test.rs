//! Cancellation Integration Tests
//!
//! Once a turn is cancelled no further events arrive and no further
//! provider calls are made.

use std::sync::Arc;
use std::time::Duration;

use agent_engine::{
    AgentLoop, Message, ToolBridge, ToolContext, TurnRequest, UnifiedStreamEvent,
    UnifiedToolRegistry,
};
use agent_engine_core::error::CoreResult;
use agent_engine_core::tool_trait::{ToolDefinitionTrait, ToolExecutable};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::support::{call, collect, kinds, provider, SleepTool, Step};

fn sleep_bridge() -> ToolBridge {
    ToolBridge::new(Arc::new(UnifiedToolRegistry::new().with_tool(Arc::new(SleepTool))))
}

#[tokio::test]
async fn test_cancel_during_tool_execution() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("call_1", "sleep", r#"{"ms":600000}"#)]),
        Step::Text("unreachable"),
    ]);
    let agent = AgentLoop::new(provider.clone(), sleep_bridge());
    let (handle, mut rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("wait")]));

    let mut after_cancel = Vec::new();
    let mut cancelled = false;
    while let Some(event) = rx.recv().await {
        if cancelled {
            after_cancel.push(event);
            continue;
        }
        if matches!(event, UnifiedStreamEvent::ToolStart { .. }) {
            handle.cancel();
            cancelled = true;
        }
    }

    assert!(cancelled);
    assert!(after_cancel.is_empty(), "events after cancel: {:?}", after_cancel);
    let outcome = handle.join().await;
    assert!(outcome.is_cancelled());
    assert!(outcome.steps().is_empty());
    assert_eq!(provider.calls(), 1);
}

/// Cancels the turn's token from inside the first step, so the signal is
/// already set when the loop would issue the second request.
struct StopTool {
    cancel: CancellationToken,
}

impl ToolDefinitionTrait for StopTool {
    fn name(&self) -> &str {
        "stop"
    }

    fn description(&self) -> &str {
        "Ask the caller to stop"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
}

#[async_trait]
impl ToolExecutable for StopTool {
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> CoreResult<Value> {
        self.cancel.cancel();
        Ok(json!("stopping"))
    }
}

#[tokio::test]
async fn test_cancel_after_first_step_skips_second_request() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("call_1", "stop", "{}")]),
        Step::Text("unreachable"),
    ]);
    let cancel = CancellationToken::new();
    let registry = UnifiedToolRegistry::new().with_tool(Arc::new(StopTool {
        cancel: cancel.clone(),
    }));
    let agent = AgentLoop::new(provider.clone(), ToolBridge::new(Arc::new(registry)));

    let (tx, rx) = mpsc::channel(64);
    let outcome = agent
        .run(TurnRequest::new("s", vec![Message::user("stop")]), tx, cancel)
        .await;
    let events = collect(rx).await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(kinds(&events), vec!["usage", "tool_start"]);
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.steps().len(), 1);
    assert_eq!(outcome.steps()[0].tool_results.len(), 1);
}

#[tokio::test]
async fn test_cancel_drops_in_flight_response() {
    let provider = provider(vec![Step::Hang]);
    let agent = AgentLoop::new(provider.clone(), sleep_bridge());
    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("hello")]));

    while provider.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    handle.cancel();

    let events = collect(rx).await;
    assert!(events.is_empty(), "unexpected events: {:?}", events);
    assert!(handle.join().await.is_cancelled());
    assert_eq!(provider.calls(), 1);
}
