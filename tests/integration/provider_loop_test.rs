//! Provider Loop Integration Tests
//!
//! Full turns against a mocked Gemini endpoint, so the real request
//! builder and stream adapter run on every step. Gemini leaves call ids
//! out, which makes the engine generate them.

use std::sync::Arc;

use agent_engine_llm::{GeminiProvider, MessageContent, ProviderConfig, ProviderType};
use agent_engine::{
    AgentLoop, Message, ToolBridge, TurnOutcome, TurnRequest, UnifiedStreamEvent,
    UnifiedToolRegistry,
};
use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::{collect, SleepTool, WeatherTool};

const STREAM_PATH: &str = "/models/gemini-2.5-flash:streamGenerateContent";

fn function_call_chunk(name: &str, args: &str) -> String {
    format!(
        concat!(
            "data: {{\"candidates\":[{{\"content\":{{\"role\":\"model\",\"parts\":",
            "[{{\"functionCall\":{{\"name\":\"{}\",\"args\":{}}}}}]}},\"finishReason\":\"STOP\"}}],",
            "\"usageMetadata\":{{\"promptTokenCount\":40,\"candidatesTokenCount\":5}}}}\n\n"
        ),
        name, args
    )
}

fn text_chunk(text: &str) -> String {
    format!(
        concat!(
            "data: {{\"candidates\":[{{\"content\":{{\"role\":\"model\",\"parts\":[{{\"text\":\"{}\"}}]}},",
            "\"finishReason\":\"STOP\"}}],\"usageMetadata\":{{\"promptTokenCount\":60,\"candidatesTokenCount\":6}}}}\n\n"
        ),
        text
    )
}

/// Mount one streamed reply per step, served in order.
async fn mount_steps(server: &MockServer, replies: Vec<String>) {
    for reply in replies {
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(reply, "text/event-stream"))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

fn gemini_agent(server: &MockServer) -> AgentLoop {
    let mut config =
        ProviderConfig::new(ProviderType::Gemini, "gemini-2.5-flash").with_api_key("g-key");
    config.base_url = Some(server.uri());
    let provider = Arc::new(GeminiProvider::new(config).unwrap());
    let registry = UnifiedToolRegistry::new()
        .with_tool(Arc::new(WeatherTool))
        .with_tool(Arc::new(SleepTool));
    AgentLoop::new(provider, ToolBridge::new(Arc::new(registry)))
}

fn function_response_names(body: &Value) -> Vec<String> {
    body["contents"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|content| content["parts"].as_array().cloned().unwrap_or_default())
        .filter_map(|part| part["functionResponse"]["name"].as_str().map(str::to_string))
        .collect()
}

// ============================================================================
// Multi-step Tool Loop
// ============================================================================

#[tokio::test]
async fn test_two_tool_steps_keep_calls_and_results_paired() {
    let server = MockServer::start().await;
    mount_steps(
        &server,
        vec![
            function_call_chunk("getWeather", r#"{"city":"Oslo"}"#),
            function_call_chunk("sleep", r#"{"ms":0}"#),
            text_chunk("Oslo is 18C."),
        ],
    )
    .await;
    let agent = gemini_agent(&server);

    let request = TurnRequest::new("s1", vec![Message::user("Weather in Oslo, then wait")]);
    let (handle, rx) = agent.spawn(request);
    let events = collect(rx).await;
    let outcome = handle.join().await;

    let started: Vec<(String, String)> = events
        .iter()
        .filter_map(|e| match e {
            UnifiedStreamEvent::ToolStart {
                tool_id, tool_name, ..
            } => Some((tool_id.clone(), tool_name.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(started.len(), 2);
    assert_eq!(started[0].1, "getWeather");
    assert_eq!(started[1].1, "sleep");
    assert_ne!(started[0].0, started[1].0);

    let results: Vec<(String, String)> = events
        .iter()
        .filter_map(|e| match e {
            UnifiedStreamEvent::ToolResult {
                tool_id, result, ..
            } => Some((tool_id.clone(), result.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], (started[0].0.clone(), "Oslo: 18C".to_string()));
    assert_eq!(results[1].0, started[1].0);
    assert!(results[1].1.contains(&started[1].0));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let second: Value = requests[1].body_json().unwrap();
    assert_eq!(function_response_names(&second), vec!["getWeather"]);
    let third: Value = requests[2].body_json().unwrap();
    assert_eq!(function_response_names(&third), vec!["getWeather", "sleep"]);

    match outcome {
        TurnOutcome::Completed { messages, steps, .. } => {
            assert_eq!(steps.len(), 3);
            let use_ids: Vec<&str> = messages
                .iter()
                .flat_map(|m| m.content.iter())
                .filter_map(|c| match c {
                    MessageContent::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(use_ids, vec![started[0].0.as_str(), started[1].0.as_str()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_generated_ids_differ_between_turns() {
    let server = MockServer::start().await;
    mount_steps(
        &server,
        vec![
            function_call_chunk("getWeather", r#"{"city":"Oslo"}"#),
            text_chunk("Done."),
            function_call_chunk("getWeather", r#"{"city":"Bergen"}"#),
            text_chunk("Done again."),
        ],
    )
    .await;
    let agent = gemini_agent(&server);

    let first_id = |events: &[UnifiedStreamEvent]| {
        events.iter().find_map(|e| match e {
            UnifiedStreamEvent::ToolStart { tool_id, .. } => Some(tool_id.clone()),
            _ => None,
        })
    };

    let (handle, rx) = agent.spawn(TurnRequest::new("s1", vec![Message::user("Oslo?")]));
    let events = collect(rx).await;
    let history = match handle.join().await {
        TurnOutcome::Completed { messages, .. } => messages,
        other => panic!("unexpected outcome: {:?}", other),
    };
    let turn_one = first_id(&events).unwrap();

    let mut next = history;
    next.push(Message::user("And Bergen?"));
    let (handle, rx) = agent.spawn(TurnRequest::new("s1", next));
    let events = collect(rx).await;
    assert!(handle.join().await.is_completed());
    let turn_two = first_id(&events).unwrap();

    assert_ne!(turn_one, turn_two);
}
