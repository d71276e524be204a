//! Agentic Loop Integration Tests
//!
//! Verifies complete turns through `AgentLoop`:
//! - Tool round trip with ordered events and conversation threading
//! - Step cap ends the turn with `max_steps`
//! - Parallel execution reports results in call order
//! - Invalid arguments come back to the model as errors

use std::sync::Arc;

use agent_engine_llm::{MessageContent, MessageRole, UsageReport};
use agent_engine_tools::{InMemoryPreviewStore, PreviewStore};
use agent_engine::{
    AgentLoop, Message, ToolBridge, TurnOutcome, TurnRequest, UnifiedStreamEvent,
    UnifiedToolRegistry,
};
use serde_json::json;

use crate::support::{call, collect, kinds, provider, ScriptedProvider, SleepTool, Step, WeatherTool};

fn weather_bridge() -> (ToolBridge, Arc<InMemoryPreviewStore>) {
    let registry = UnifiedToolRegistry::new()
        .with_tool(Arc::new(WeatherTool))
        .with_tool(Arc::new(SleepTool));
    let store = Arc::new(InMemoryPreviewStore::new());
    let bridge = ToolBridge::new(Arc::new(registry)).with_preview_store(store.clone());
    (bridge, store)
}

// ============================================================================
// Tool Round Trip
// ============================================================================

#[tokio::test]
async fn test_weather_turn_event_order() {
    let provider = provider(vec![
        Step::Tools(
            Some("Let me check."),
            vec![call("call_1", "getWeather", r#"{"city":"Paris"}"#)],
        ),
        Step::Text("It is 18C in Paris."),
    ]);
    let (bridge, store) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge);

    let request = TurnRequest::new("session-1", vec![Message::user("Weather in Paris?")])
        .with_system("You are a weather assistant.");
    let (handle, rx) = agent.spawn(request);
    let events = collect(rx).await;
    let outcome = handle.join().await;

    assert_eq!(
        kinds(&events),
        vec![
            "text_delta",
            "text_delta",
            "text_delta",
            "usage",
            "tool_start",
            "tool_result",
            "step_finish",
            "text_delta",
            "text_delta",
            "text_delta",
            "text_delta",
            "text_delta",
            "usage",
            "step_finish",
            "complete",
        ]
    );

    let preview_key = match &events[5] {
        UnifiedStreamEvent::ToolResult {
            tool_id,
            tool_name,
            result,
            preview_key,
        } => {
            assert_eq!(tool_id, "call_1");
            assert_eq!(tool_name, "getWeather");
            assert_eq!(result, "Paris: 18C");
            preview_key.clone().expect("ui payload should be stored")
        }
        other => panic!("expected tool_result, got {:?}", other),
    };
    assert_eq!(store.get(&preview_key).unwrap()["hourly"], json!([17, 18, 19]));

    assert!(matches!(
        events[6],
        UnifiedStreamEvent::StepFinish {
            step_index: 1,
            tool_calls: 1,
            ..
        }
    ));
    assert!(matches!(
        events[13],
        UnifiedStreamEvent::StepFinish {
            step_index: 2,
            tool_calls: 0,
            ..
        }
    ));
    assert_eq!(
        events[14],
        UnifiedStreamEvent::Complete {
            stop_reason: Some("end_turn".to_string())
        }
    );

    match outcome {
        TurnOutcome::Completed {
            steps,
            messages,
            usage,
            stop_reason,
        } => {
            assert_eq!(stop_reason, "end_turn");
            assert_eq!(steps.len(), 2);
            assert_eq!(usage.steps, 2);
            assert_eq!(usage.usage.total_tokens, 240);
            assert_eq!(messages.len(), 4);
            assert_eq!(messages[3].text_content(), "It is 18C in Paris.");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_sunny_paris_example() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("call_1", "getWeather", r#"{"city":"Paris"}"#)]),
        Step::Text("It is sunny."),
    ]);
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge);

    let request = TurnRequest::new("s", vec![Message::user("Weather in Paris?")])
        .with_system("You are helpful");
    let (handle, rx) = agent.spawn(request);
    let events = collect(rx).await;
    let outcome = handle.join().await;

    let visible: Vec<&UnifiedStreamEvent> = events
        .iter()
        .filter(|e| !matches!(e, UnifiedStreamEvent::Usage { .. } | UnifiedStreamEvent::StepFinish { .. }))
        .collect();
    let visible_kinds: Vec<&str> = visible.iter().map(|e| e.kind()).collect();
    assert_eq!(
        visible_kinds,
        vec!["tool_start", "tool_result", "text_delta", "text_delta", "text_delta", "complete"]
    );
    let text: String = events
        .iter()
        .filter_map(|e| match e {
            UnifiedStreamEvent::TextDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "It is sunny.");
    assert_eq!(outcome.steps().len(), 2);
    assert_eq!(provider.requests()[0].system.as_deref(), Some("You are helpful"));
}

#[tokio::test]
async fn test_second_request_carries_tool_exchange() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("call_1", "getWeather", r#"{"city":"Oslo"}"#)]),
        Step::Text("Cold."),
    ]);
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge);
    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Oslo?")]));
    collect(rx).await;
    assert!(handle.join().await.is_completed());

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 1);
    assert!(requests[0].tools.iter().any(|t| t.name == "getWeather"));

    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].role, MessageRole::Assistant);
    assert_eq!(
        second[1].content,
        vec![MessageContent::ToolUse {
            id: "call_1".to_string(),
            name: "getWeather".to_string(),
            input: json!({"city": "Oslo"}),
        }]
    );
    assert_eq!(
        second[2].content,
        vec![MessageContent::ToolResult {
            tool_use_id: "call_1".to_string(),
            content: "Oslo: 18C".to_string(),
            is_error: None,
        }]
    );
}

// ============================================================================
// Step Cap
// ============================================================================

#[tokio::test]
async fn test_step_cap_stops_after_exactly_max_steps() {
    let looping = (0..5)
        .map(|i| {
            Step::Tools(
                None,
                vec![call(&format!("call_{}", i), "getWeather", r#"{"city":"Rome"}"#)],
            )
        })
        .collect();
    let provider = provider(looping);
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge).with_max_steps(3);

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("loop")]));
    let events = collect(rx).await;
    let outcome = handle.join().await;

    assert_eq!(provider.calls(), 3);
    let step_finishes = events
        .iter()
        .filter(|e| matches!(e, UnifiedStreamEvent::StepFinish { .. }))
        .count();
    assert_eq!(step_finishes, 3);
    let results = events
        .iter()
        .filter(|e| matches!(e, UnifiedStreamEvent::ToolResult { .. }))
        .count();
    assert_eq!(results, 2);
    assert_eq!(
        events.last(),
        Some(&UnifiedStreamEvent::Complete {
            stop_reason: Some("max_steps".to_string())
        })
    );
    assert!(!events.iter().any(|e| matches!(e, UnifiedStreamEvent::Error { .. })));

    match outcome {
        TurnOutcome::Completed {
            steps, stop_reason, ..
        } => {
            assert_eq!(stop_reason, "max_steps");
            assert_eq!(steps.len(), 3);
            assert!(steps[2].tool_results.is_empty());
            assert_eq!(steps[2].tool_calls.len(), 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_request_cap_overrides_loop_cap() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("a", "getWeather", r#"{"city":"Rome"}"#)]),
        Step::Tools(None, vec![call("b", "getWeather", r#"{"city":"Rome"}"#)]),
    ]);
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge).with_max_steps(10);

    let request = TurnRequest::new("s", vec![Message::user("loop")]).with_max_steps(1);
    let (handle, rx) = agent.spawn(request);
    collect(rx).await;
    let outcome = handle.join().await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.steps().len(), 1);
}

// ============================================================================
// Parallel Execution and Failures
// ============================================================================

#[tokio::test]
async fn test_parallel_results_follow_call_order() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![
            Step::Tools(
                None,
                vec![
                    call("slow", "sleep", r#"{"ms":60}"#),
                    call("fast", "sleep", r#"{"ms":5}"#),
                ],
            ),
            Step::Text("Both done."),
        ])
        .parallel(),
    );
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider, bridge);

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("wait")]));
    let events = collect(rx).await;
    let outcome = handle.join().await;

    let tool_events: Vec<(&str, &str)> = events
        .iter()
        .filter_map(|e| match e {
            UnifiedStreamEvent::ToolStart { tool_id, .. } => Some(("start", tool_id.as_str())),
            UnifiedStreamEvent::ToolResult { tool_id, .. } => Some(("result", tool_id.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        tool_events,
        vec![
            ("start", "slow"),
            ("start", "fast"),
            ("result", "slow"),
            ("result", "fast"),
        ]
    );

    let step = &outcome.steps()[0];
    assert_eq!(step.tool_results[0].model_content(), "slept in slow");
    assert_eq!(step.tool_results[1].model_content(), "slept in fast");
}

#[tokio::test]
async fn test_invalid_arguments_are_reported_to_model() {
    let provider = provider(vec![
        Step::Tools(None, vec![call("call_1", "getWeather", r#"{"town":"Paris"}"#)]),
        Step::Text("I need a city."),
    ]);
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider.clone(), bridge);

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("weather")]));
    let events = collect(rx).await;
    assert!(handle.join().await.is_completed());

    assert!(events.iter().any(|e| matches!(
        e,
        UnifiedStreamEvent::ToolError { tool_id, error, .. }
            if tool_id == "call_1" && error.starts_with("validation")
    )));

    let requests = provider.requests();
    match &requests[1].messages[2].content[0] {
        MessageContent::ToolResult {
            tool_use_id,
            is_error,
            content,
        } => {
            assert_eq!(tool_use_id, "call_1");
            assert_eq!(*is_error, Some(true));
            assert!(content.contains("\"kind\":\"validation\""));
        }
        other => panic!("unexpected content: {:?}", other),
    }
}

#[tokio::test]
async fn test_usage_event_reports_uncached_input() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![Step::Text("Hi")]).with_usage(UsageReport::new(120, 40, 2000, 0)),
    );
    let (bridge, _) = weather_bridge();
    let agent = AgentLoop::new(provider, bridge);

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Hi")]));
    let events = collect(rx).await;
    handle.join().await;

    let usage = events
        .iter()
        .find_map(UsageReport::from_event)
        .expect("usage event");
    assert_eq!(usage.input_tokens, 120);
    assert_eq!(usage.cached_tokens, 2000);
    assert_eq!(usage.total_tokens, 2160);
}
