//! Callback Dispatch Integration Tests

use std::sync::{Arc, Mutex};

use agent_engine_llm::UsageReport;
use agent_engine::{
    pump_events, AgentLoop, Message, ToolBridge, TurnCallbacks, TurnRequest, UnifiedToolRegistry,
};

use crate::support::{call, provider, Step, WeatherTool};

#[derive(Default)]
struct Transcript {
    text: Mutex<String>,
    log: Mutex<Vec<String>>,
    tokens: Mutex<u32>,
}

impl TurnCallbacks for Transcript {
    fn on_text_chunk(&self, text: &str) {
        self.text.lock().unwrap().push_str(text);
    }

    fn on_tool_start(&self, call_id: &str, tool_name: &str, arguments: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("start {} {} {}", call_id, tool_name, arguments));
    }

    fn on_tool_end(&self, call_id: &str, _tool_name: &str, result: &str, preview_key: Option<&str>) {
        self.log.lock().unwrap().push(format!(
            "end {} {} preview={}",
            call_id,
            result,
            preview_key.is_some()
        ));
    }

    fn on_usage(&self, usage: &UsageReport) {
        *self.tokens.lock().unwrap() += usage.total_tokens;
    }

    fn on_step(&self, step_index: u32, tool_calls: u32, _stop_reason: Option<&str>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("step {} calls={}", step_index, tool_calls));
    }

    fn on_done(&self, stop_reason: Option<&str>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("done {}", stop_reason.unwrap_or("-")));
    }
}

#[tokio::test]
async fn test_callbacks_follow_turn() {
    let provider = provider(vec![
        Step::Tools(
            Some("Checking. "),
            vec![call("call_1", "getWeather", r#"{"city":"Lima"}"#)],
        ),
        Step::Text("Mild."),
    ]);
    let registry = UnifiedToolRegistry::new().with_tool(Arc::new(WeatherTool));
    let agent = AgentLoop::new(provider, ToolBridge::new(Arc::new(registry)));

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Lima?")]));
    let transcript = Transcript::default();
    pump_events(rx, &transcript).await;
    assert!(handle.join().await.is_completed());

    assert_eq!(*transcript.text.lock().unwrap(), "Checking. Mild.");
    assert_eq!(*transcript.tokens.lock().unwrap(), 240);
    assert_eq!(
        *transcript.log.lock().unwrap(),
        vec![
            r#"start call_1 getWeather {"city":"Lima"}"#.to_string(),
            "end call_1 Lima: 18C preview=false".to_string(),
            "step 1 calls=1".to_string(),
            "step 2 calls=0".to_string(),
            "done end_turn".to_string(),
        ]
    );
}
