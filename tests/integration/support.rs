//! Test doubles: a provider that replays a fixed script, and a few tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use agent_engine_core::error::{CoreError, CoreResult};
use agent_engine_core::tool_trait::{ModelResult, ToolDefinitionTrait, ToolExecutable};
use agent_engine_llm::{
    LlmError, LlmResponse, LlmResult, ProviderConfig, ProviderType, StopReason, StreamRequest,
    ToolCall, UsageReport,
};
use agent_engine::{LlmProvider, ToolContext, UnifiedStreamEvent};

/// One scripted provider response.
pub enum Step {
    /// Stream the text, then end the turn
    Text(&'static str),
    /// Stream the optional text, then request the tools
    Tools(Option<&'static str>, Vec<ToolCall>),
    Fail(LlmError),
    /// Never respond; return `Cancelled` once the request is cancelled
    Hang,
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    requests: Mutex<Vec<StreamRequest>>,
    parallel: bool,
    usage: UsageReport,
    config: ProviderConfig,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            parallel: false,
            usage: UsageReport::new(100, 20, 0, 0),
            config: ProviderConfig::new(ProviderType::Anthropic, "scripted-model"),
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_usage(mut self, usage: UsageReport) -> Self {
        self.usage = usage;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests as received, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, text: Option<&str>, tool_calls: Vec<ToolCall>) -> LlmResponse {
        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        LlmResponse {
            content: text.map(str::to_string),
            thinking: None,
            tool_calls,
            stop_reason,
            usage: self.usage,
            model: self.config.model.clone(),
        }
    }
}

async fn stream_text(tx: &mpsc::Sender<UnifiedStreamEvent>, text: &str) {
    for chunk in text.split_inclusive(' ') {
        let _ = tx
            .send(UnifiedStreamEvent::TextDelta {
                content: chunk.to_string(),
            })
            .await;
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        false
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        self.parallel
    }

    async fn stream_message(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Text(text)) => {
                stream_text(&tx, text).await;
                Ok(self.respond(Some(text), Vec::new()))
            }
            Some(Step::Tools(text, calls)) => {
                if let Some(text) = text {
                    stream_text(&tx, text).await;
                }
                Ok(self.respond(text, calls))
            }
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                request.cancel.cancelled().await;
                Err(LlmError::Cancelled)
            }
            None => Err(LlmError::Other {
                message: "script exhausted".to_string(),
            }),
        }
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// `getWeather(city)`; the model sees a one-line summary, the full
/// forecast goes to the preview store.
pub struct WeatherTool;

impl ToolDefinitionTrait for WeatherTool {
    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        })
    }
}

#[async_trait]
impl ToolExecutable for WeatherTool {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let city = args["city"]
            .as_str()
            .ok_or_else(|| CoreError::validation("city must be a string"))?;
        Ok(json!({ "city": city, "temp_c": 18, "hourly": [17, 18, 19] }))
    }

    fn to_model_result(&self, raw: &Value) -> Option<ModelResult> {
        Some(
            ModelResult::minimal(json!(format!(
                "{}: {}C",
                raw["city"].as_str()?,
                raw["temp_c"]
            )))
            .with_ui(raw.clone()),
        )
    }
}

/// Sleeps for `{"ms": n}` and reports the call id it ran for.
pub struct SleepTool;

impl ToolDefinitionTrait for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for a while"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ms": { "type": "integer" } },
            "required": ["ms"]
        })
    }
}

#[async_trait]
impl ToolExecutable for SleepTool {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(format!("slept in {}", ctx.tool_call_id())))
    }
}

pub fn call(id: &str, name: &str, args: &str) -> ToolCall {
    ToolCall::from_raw_arguments(id, name, args)
}

pub async fn collect(mut rx: mpsc::Receiver<UnifiedStreamEvent>) -> Vec<UnifiedStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[UnifiedStreamEvent]) -> Vec<&'static str> {
    events.iter().map(UnifiedStreamEvent::kind).collect()
}

pub fn provider(steps: Vec<Step>) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::new(steps))
}
