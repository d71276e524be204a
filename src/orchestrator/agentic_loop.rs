//! Agentic Loop Controller
//!
//! Drives one turn: invoke the provider, surface its output, run any
//! requested tools through the bridge, append the results to the
//! conversation and invoke the provider again, until the model stops
//! asking for tools or the step cap is reached.
//!
//! Event order for a tool-using step:
//!
//! ```text
//! text_delta* / thinking_delta*  (streamed by the adapter)
//! usage
//! tool_start+  tool_result | tool_error  (per call)
//! step_finish
//! ```
//!
//! The final step emits `usage`, `step_finish`, then `complete`. A failed
//! turn ends with a single `error` event. A cancelled turn emits nothing
//! once cancellation is observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use agent_engine_core::context::ToolContext;
use agent_engine_core::streaming::UnifiedStreamEvent;
use agent_engine_llm::{
    create_provider_with, CacheFailure, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult,
    Message, RetryConfig, RetryGovernor, RetryNotifier, StreamRequest, ToolCall, TurnUsage,
};
use agent_engine_tools::{ToolBridge, ToolCallResult};

use super::handle::{TurnHandle, TurnOutcome};
use super::step::AgentStep;
use crate::config::{clamp_max_steps, EngineConfig, DEFAULT_MAX_STEPS};
use crate::error::{EngineError, EngineResult};

/// Capacity of the turn's event channel
const EVENT_BUFFER: usize = 256;

/// Stop reason reported when the step cap ends a turn
pub const MAX_STEPS_STOP_REASON: &str = "max_steps";

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub system: Option<String>,
    /// Conversation so far, ending with the new user message
    pub messages: Vec<Message>,
    /// Overrides the loop's cap for this turn (clamped)
    pub max_steps: Option<u32>,
    pub options: LlmRequestOptions,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            system: None,
            messages,
            max_steps: None,
            options: LlmRequestOptions::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_options(mut self, options: LlmRequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// The turn driver. Cheap to clone; one instance can run many turns.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    bridge: ToolBridge,
    governor: RetryGovernor,
    max_steps: u32,
    notifier: Option<RetryNotifier>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, bridge: ToolBridge) -> Self {
        Self {
            provider,
            bridge,
            governor: RetryGovernor::default(),
            max_steps: DEFAULT_MAX_STEPS,
            notifier: None,
        }
    }

    /// Build from a configuration file's provider profile.
    pub fn from_config(config: &EngineConfig, profile: &str, bridge: ToolBridge) -> EngineResult<Self> {
        config.validate()?;
        let provider_config = config.provider(profile)?.clone();
        let provider = create_provider_with(
            provider_config,
            Some(&config.cache),
            Some(Arc::new(log_cache_failure)),
        )?;
        Ok(Self::new(provider, bridge)
            .with_max_steps(config.max_steps())
            .with_retry_config(config.retry.clone()))
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = clamp_max_steps(max_steps);
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.governor = RetryGovernor::new(config);
        self
    }

    /// Called before every retry wait.
    pub fn with_retry_notifier(mut self, notifier: RetryNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Run a turn on a background task.
    ///
    /// The receiver yields the turn's events and closes when the turn ends.
    pub fn spawn(&self, request: TurnRequest) -> (TurnHandle, mpsc::Receiver<UnifiedStreamEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.run(request, tx, token).await });
        (TurnHandle::new(cancel, task), rx)
    }

    /// Run a turn to completion on the current task.
    pub async fn run(
        &self,
        request: TurnRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let span = tracing::info_span!(
            "turn",
            session_id = %request.session_id,
            provider = self.provider.name(),
            model = %self.provider.model(),
        );
        self.run_turn(request, tx, cancel).instrument(span).await
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let max_steps = request.max_steps.map(clamp_max_steps).unwrap_or(self.max_steps);
        let tools = if self.provider.supports_tools() {
            self.bridge.definitions()
        } else {
            Vec::new()
        };
        let TurnRequest {
            session_id,
            system,
            mut messages,
            options,
            ..
        } = request;

        let mut steps: Vec<AgentStep> = Vec::new();
        let mut usage = TurnUsage::default();
        let mut step_index = 0u32;

        tracing::info!(max_steps, tools = tools.len(), "Turn started");

        loop {
            step_index += 1;
            if cancel.is_cancelled() {
                return cancelled(steps, step_index);
            }

            let stream_request = StreamRequest {
                session_id: session_id.clone(),
                messages: messages.clone(),
                system: system.clone(),
                tools: tools.clone(),
                options: options.clone(),
                cancel: cancel.clone(),
            };
            let response = match self.invoke(stream_request, &tx, &cancel).await {
                Ok(response) => response,
                Err(err) => return self.fail(steps, err.into(), &tx, &cancel).await,
            };
            if cancel.is_cancelled() {
                return cancelled(steps, step_index);
            }

            usage.add(&response.usage);
            emit(&tx, &cancel, response.usage.to_event()).await;

            let LlmResponse {
                content,
                thinking,
                tool_calls,
                stop_reason,
                usage: step_usage,
                ..
            } = response;
            let text = content.unwrap_or_default();
            let stop = stop_reason.to_string();

            if tool_calls.is_empty() {
                if !text.is_empty() {
                    messages.push(Message::assistant(text.clone()));
                }
                steps.push(AgentStep {
                    step_index,
                    text,
                    reasoning: thinking.unwrap_or_default(),
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                    usage: step_usage,
                    stop_reason,
                });
                emit(&tx, &cancel, step_finish(step_index, 0, &stop)).await;
                emit(
                    &tx,
                    &cancel,
                    UnifiedStreamEvent::Complete {
                        stop_reason: Some(stop.clone()),
                    },
                )
                .await;
                tracing::info!(steps = step_index, stop_reason = %stop, total_tokens = usage.usage.total_tokens, "Turn completed");
                return TurnOutcome::Completed {
                    steps,
                    messages,
                    usage,
                    stop_reason: stop,
                };
            }

            let call_count = tool_calls.len() as u32;
            if step_index >= max_steps {
                tracing::warn!(max_steps, pending_calls = call_count, "Step cap reached with tool calls pending");
                steps.push(AgentStep {
                    step_index,
                    text,
                    reasoning: thinking.unwrap_or_default(),
                    tool_calls,
                    tool_results: Vec::new(),
                    usage: step_usage,
                    stop_reason,
                });
                emit(&tx, &cancel, step_finish(step_index, call_count, &stop)).await;
                emit(
                    &tx,
                    &cancel,
                    UnifiedStreamEvent::Complete {
                        stop_reason: Some(MAX_STEPS_STOP_REASON.to_string()),
                    },
                )
                .await;
                return TurnOutcome::Completed {
                    steps,
                    messages,
                    usage,
                    stop_reason: MAX_STEPS_STOP_REASON.to_string(),
                };
            }

            let results = match self
                .execute_tools(&session_id, step_index, &tool_calls, &tx, &cancel)
                .await
            {
                Some(results) => results,
                None => return cancelled(steps, step_index),
            };

            messages.push(Message::assistant_tool_calls(Some(&text), &tool_calls));
            messages.push(Message::tool_results(
                results.iter().map(ToolCallResult::to_message_content),
            ));
            emit(&tx, &cancel, step_finish(step_index, call_count, &stop)).await;

            for result in &results {
                if let Err(failure) = &result.outcome {
                    let err = EngineError::from(failure);
                    tracing::warn!(
                        tool = %result.tool_name,
                        call_id = %result.call_id,
                        code = err.code(),
                        error = %err,
                        "Tool call failed"
                    );
                }
            }
            tracing::debug!(
                step_index,
                tool_calls = call_count,
                failed = results.iter().filter(|r| r.is_error()).count(),
                "Step finished"
            );
            steps.push(AgentStep {
                step_index,
                text,
                reasoning: thinking.unwrap_or_default(),
                tool_calls,
                tool_results: results,
                usage: step_usage,
                stop_reason,
            });
        }
    }

    /// One provider invocation under the retry governor.
    ///
    /// Each attempt streams into its own channel; a relay forwards to the
    /// turn channel and records whether anything got through. Once an
    /// attempt has forwarded output it is not retried.
    async fn invoke(
        &self,
        request: StreamRequest,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> LlmResult<LlmResponse> {
        let forwarded = Arc::new(AtomicBool::new(false));
        let guard = forwarded.clone();

        self.governor
            .run_guarded(
                cancel,
                self.notifier.as_ref(),
                |attempt| {
                    let provider = self.provider.clone();
                    let request = request.clone();
                    let forwarded = forwarded.clone();
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    async move {
                        if attempt > 0 {
                            tracing::debug!(attempt, "Invoking provider again");
                        }
                        let (attempt_tx, mut attempt_rx) = mpsc::channel(EVENT_BUFFER);
                        let relay = async move {
                            while let Some(event) = attempt_rx.recv().await {
                                if cancel.is_cancelled() {
                                    continue;
                                }
                                forwarded.store(true, Ordering::SeqCst);
                                let _ = tx.send(event).await;
                            }
                        };
                        let (result, ()) =
                            tokio::join!(provider.stream_message(request, attempt_tx), relay);
                        result
                    }
                },
                |_| !guard.load(Ordering::SeqCst),
            )
            .await
    }

    async fn execute_tools(
        &self,
        session_id: &str,
        step_index: u32,
        calls: &[ToolCall],
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> Option<Vec<ToolCallResult>> {
        let context_for = |call: &ToolCall| {
            ToolContext::new(session_id, call.id.clone(), step_index)
                .with_provider(self.provider.name(), self.provider.model())
        };

        if self.provider.supports_parallel_tool_calls() && calls.len() > 1 {
            for call in calls {
                emit(tx, cancel, tool_start(call)).await;
            }
            let executions = calls.iter().map(|call| {
                let ctx = context_for(call);
                async move { self.bridge.execute(&ctx, call).await }
            });
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                results = join_all(executions) => results,
            };
            for result in &results {
                emit(tx, cancel, result.to_event()).await;
            }
            return Some(results);
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                return None;
            }
            emit(tx, cancel, tool_start(call)).await;
            let ctx = context_for(call);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.bridge.execute(&ctx, call) => result,
            };
            emit(tx, cancel, result.to_event()).await;
            results.push(result);
        }
        Some(results)
    }

    async fn fail(
        &self,
        steps: Vec<AgentStep>,
        error: EngineError,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        if cancel.is_cancelled() || error == EngineError::Cancelled {
            return cancelled(steps, 0);
        }
        tracing::error!(code = error.code(), error = %error, "Turn failed");
        emit(
            tx,
            cancel,
            UnifiedStreamEvent::Error {
                message: error.to_string(),
                code: Some(error.code().to_string()),
            },
        )
        .await;
        TurnOutcome::Failed { steps, error }
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("max_steps", &self.max_steps)
            .field("retry", self.governor.config())
            .finish()
    }
}

fn cancelled(steps: Vec<AgentStep>, step_index: u32) -> TurnOutcome {
    tracing::info!(step_index, completed_steps = steps.len(), "Turn cancelled");
    TurnOutcome::Cancelled { steps }
}

/// Send unless the turn has been cancelled. A dropped receiver is ignored.
async fn emit(tx: &mpsc::Sender<UnifiedStreamEvent>, cancel: &CancellationToken, event: UnifiedStreamEvent) {
    if cancel.is_cancelled() {
        return;
    }
    let _ = tx.send(event).await;
}

fn step_finish(step_index: u32, tool_calls: u32, stop_reason: &str) -> UnifiedStreamEvent {
    UnifiedStreamEvent::StepFinish {
        step_index,
        tool_calls,
        stop_reason: Some(stop_reason.to_string()),
    }
}

fn tool_start(call: &ToolCall) -> UnifiedStreamEvent {
    let arguments = match (&call.arguments, &call.parse_error) {
        (serde_json::Value::String(raw), Some(_)) => raw.clone(),
        (value, _) => value.to_string(),
    };
    UnifiedStreamEvent::ToolStart {
        tool_id: call.id.clone(),
        tool_name: call.name.clone(),
        arguments,
    }
}

fn log_cache_failure(failure: &CacheFailure) {
    let err = EngineError::from(failure);
    tracing::warn!(
        session_id = %failure.session_id,
        code = err.code(),
        error = %err,
        "Continuing uncached"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use agent_engine_core::error::CoreResult;
    use agent_engine_core::tool_trait::{ToolDefinitionTrait, ToolExecutable, UnifiedToolRegistry};
    use agent_engine_llm::{LlmError, ProviderConfig, ProviderType, StopReason, UsageReport};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    enum Reply {
        Text(&'static str),
        Tools(Vec<ToolCall>),
        Fail(LlmError),
        PartialThenFail(&'static str, LlmError),
    }

    struct Scripted {
        script: Mutex<VecDeque<Reply>>,
        calls: AtomicU32,
        config: ProviderConfig,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                config: ProviderConfig::new(ProviderType::Anthropic, "scripted"),
            })
        }
    }

    fn response(content: Option<&str>, tool_calls: Vec<ToolCall>) -> LlmResponse {
        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        LlmResponse {
            content: content.map(str::to_string),
            thinking: None,
            tool_calls,
            stop_reason,
            usage: UsageReport::new(10, 5, 0, 0),
            model: "scripted".to_string(),
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn supports_thinking(&self) -> bool {
            false
        }

        fn supports_tools(&self) -> bool {
            true
        }

        async fn stream_message(
            &self,
            _request: StreamRequest,
            tx: mpsc::Sender<UnifiedStreamEvent>,
        ) -> LlmResult<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.script.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Text(text)) => {
                    let _ = tx
                        .send(UnifiedStreamEvent::TextDelta {
                            content: text.to_string(),
                        })
                        .await;
                    Ok(response(Some(text), Vec::new()))
                }
                Some(Reply::Tools(calls)) => Ok(response(None, calls)),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::PartialThenFail(text, err)) => {
                    let _ = tx
                        .send(UnifiedStreamEvent::TextDelta {
                            content: text.to_string(),
                        })
                        .await;
                    Err(err)
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

    struct Echo;

    impl ToolDefinitionTrait for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
    }

    #[async_trait]
    impl ToolExecutable for Echo {
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> CoreResult<Value> {
            Ok(args["text"].clone())
        }
    }

    fn agent(provider: Arc<Scripted>) -> AgentLoop {
        let registry = UnifiedToolRegistry::new().with_tool(Arc::new(Echo));
        AgentLoop::new(provider, ToolBridge::new(Arc::new(registry))).with_retry_config(RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..RetryConfig::default()
        })
    }

    async fn run(agent: &AgentLoop, request: TurnRequest) -> (TurnOutcome, Vec<UnifiedStreamEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = agent.run(request, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn kinds(events: &[UnifiedStreamEvent]) -> Vec<&'static str> {
        events.iter().map(UnifiedStreamEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_text_only_turn_is_single_step() {
        let provider = Scripted::new(vec![Reply::Text("Hello")]);
        let agent = agent(provider.clone());
        let (outcome, events) = run(&agent, TurnRequest::new("s", vec![Message::user("Hi")])).await;

        assert_eq!(kinds(&events), vec!["text_delta", "usage", "step_finish", "complete"]);
        match outcome {
            TurnOutcome::Completed {
                steps,
                messages,
                stop_reason,
                usage,
            } => {
                assert_eq!(steps.len(), 1);
                assert_eq!(stop_reason, "end_turn");
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].text_content(), "Hello");
                assert_eq!(usage.steps, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_tools_keep_call_order() {
        let provider = Scripted::new(vec![
            Reply::Tools(vec![
                ToolCall::from_raw_arguments("a", "echo", r#"{"text":"one"}"#),
                ToolCall::from_raw_arguments("b", "echo", r#"{"text":"two"}"#),
            ]),
            Reply::Text("done"),
        ]);
        let agent = agent(provider);
        let (outcome, events) = run(&agent, TurnRequest::new("s", vec![Message::user("go")])).await;

        assert_eq!(
            kinds(&events),
            vec![
                "usage",
                "tool_start",
                "tool_result",
                "tool_start",
                "tool_result",
                "step_finish",
                "text_delta",
                "usage",
                "step_finish",
                "complete"
            ]
        );
        let steps = outcome.steps();
        assert_eq!(steps[0].tool_results[0].call_id, "a");
        assert_eq!(steps[0].tool_results[1].call_id, "b");
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_end_turn() {
        let provider = Scripted::new(vec![
            Reply::Tools(vec![ToolCall::from_raw_arguments("a", "missing", "{}")]),
            Reply::Text("sorry"),
        ]);
        let agent = agent(provider);
        let (outcome, events) = run(&agent, TurnRequest::new("s", vec![Message::user("go")])).await;

        assert!(outcome.is_completed());
        assert!(events.iter().any(|e| matches!(
            e,
            UnifiedStreamEvent::ToolError { error, .. } if error.contains("Tool not found: missing")
        )));
        assert_eq!(
            outcome.steps()[0].tool_errors(),
            vec![EngineError::ToolExecution("Tool not found: missing".to_string())]
        );
    }

    #[tokio::test]
    async fn test_partial_output_disables_retry() {
        let provider = Scripted::new(vec![
            Reply::PartialThenFail(
                "Hel",
                LlmError::ServerError {
                    message: "connection reset".to_string(),
                    status: Some(502),
                },
            ),
            Reply::Text("never reached"),
        ]);
        let agent = agent(provider.clone());
        let (outcome, events) = run(&agent, TurnRequest::new("s", vec![Message::user("Hi")])).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.error(), Some(EngineError::TransientNetwork(_))));
        assert_eq!(kinds(&events), vec!["text_delta", "error"]);
    }

    #[tokio::test]
    async fn test_transient_failure_before_output_is_retried() {
        let provider = Scripted::new(vec![
            Reply::Fail(LlmError::ServerError {
                message: "bad gateway".to_string(),
                status: Some(502),
            }),
            Reply::Text("recovered"),
        ]);
        let agent = agent(provider.clone());
        let (outcome, _) = run(&agent, TurnRequest::new("s", vec![Message::user("Hi")])).await;

        assert!(outcome.is_completed());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_emits_single_error_event() {
        let provider = Scripted::new(vec![Reply::Fail(LlmError::AuthenticationFailed {
            message: "bad key".to_string(),
        })]);
        let agent = agent(provider.clone());
        let (outcome, events) = run(&agent, TurnRequest::new("s", vec![Message::user("Hi")])).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 1);
        match &events[0] {
            UnifiedStreamEvent::Error { code, .. } => {
                assert_eq!(code.as_deref(), Some("fatal_provider"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    }

    #[test]
    fn test_request_cap_is_clamped() {
        let request = TurnRequest::new("s", Vec::new()).with_max_steps(500);
        assert_eq!(request.max_steps.map(clamp_max_steps), Some(crate::config::MAX_STEPS_LIMIT));
        let agent = agent(Scripted::new(Vec::new())).with_max_steps(0);
        assert_eq!(agent.max_steps(), 1);
    }
}
