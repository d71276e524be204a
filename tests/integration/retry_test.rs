//! Retry Integration Tests
//!
//! Rate-limit and transient failures before any output are retried inside
//! a step; the caller sees one uninterrupted turn.

use std::sync::{Arc, Mutex};

use agent_engine_llm::{LlmError, RetryNotice, RetryNotifier, RetryReason};
use agent_engine::{
    AgentLoop, EngineError, Message, RetryConfig, ToolBridge, TurnRequest, UnifiedStreamEvent,
    UnifiedToolRegistry,
};

use crate::support::{collect, kinds, provider, Step};

fn empty_bridge() -> ToolBridge {
    ToolBridge::new(Arc::new(UnifiedToolRegistry::new()))
}

fn recording_notifier() -> (RetryNotifier, Arc<Mutex<Vec<(u32, u64, RetryReason)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let notifier: RetryNotifier = Arc::new(move |notice: &RetryNotice| {
        sink.lock()
            .unwrap()
            .push((notice.attempt, notice.wait_ms, notice.reason));
    });
    (notifier, seen)
}

#[tokio::test(start_paused = true)]
async fn test_rate_limits_wait_for_vendor_hint() {
    let provider = provider(vec![
        Step::Fail(LlmError::RateLimited {
            message: "Too many requests".to_string(),
            retry_after_ms: Some(1_500),
        }),
        Step::Fail(LlmError::RateLimited {
            message: "Resource exhausted. Please retry in 2s".to_string(),
            retry_after_ms: None,
        }),
        Step::Text("Finally."),
    ]);
    let (notifier, seen) = recording_notifier();
    let agent = AgentLoop::new(provider.clone(), empty_bridge()).with_retry_notifier(notifier);

    let started = tokio::time::Instant::now();
    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Hi")]));
    let events = collect(rx).await;
    let outcome = handle.join().await;

    assert!(outcome.is_completed());
    assert_eq!(provider.calls(), 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (1, 1_500, RetryReason::RateLimit),
            (2, 2_000, RetryReason::RateLimit)
        ]
    );
    assert!(started.elapsed() >= std::time::Duration::from_millis(3_500));
    assert_eq!(
        kinds(&events),
        vec!["text_delta", "usage", "step_finish", "complete"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_wait_is_capped() {
    let provider = provider(vec![
        Step::Fail(LlmError::RateLimited {
            message: "slow down".to_string(),
            retry_after_ms: Some(600_000),
        }),
        Step::Text("ok"),
    ]);
    let (notifier, seen) = recording_notifier();
    let agent = AgentLoop::new(provider, empty_bridge())
        .with_retry_config(RetryConfig {
            max_rate_limit_wait_ms: 5_000,
            ..RetryConfig::default()
        })
        .with_retry_notifier(notifier);

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Hi")]));
    collect(rx).await;
    assert!(handle.join().await.is_completed());
    assert_eq!(seen.lock().unwrap()[0].1, 5_000);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_last_error() {
    let unavailable = || {
        Step::Fail(LlmError::ServerError {
            message: "service unavailable".to_string(),
            status: Some(503),
        })
    };
    let provider = provider(vec![unavailable(), unavailable(), unavailable(), unavailable()]);
    let agent = AgentLoop::new(provider.clone(), empty_bridge()).with_retry_config(RetryConfig {
        max_retries: 2,
        ..RetryConfig::default()
    });

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Hi")]));
    let events = collect(rx).await;
    let outcome = handle.join().await;

    assert_eq!(provider.calls(), 3);
    assert!(matches!(outcome.error(), Some(EngineError::TransientNetwork(_))));
    assert_eq!(events.len(), 1);
    match &events[0] {
        UnifiedStreamEvent::Error { message, code } => {
            assert!(message.contains("service unavailable"));
            assert_eq!(code.as_deref(), Some("transient_network"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_request_is_not_retried() {
    let provider = provider(vec![
        Step::Fail(LlmError::InvalidRequest {
            message: "messages: roles must alternate".to_string(),
        }),
        Step::Text("unreachable"),
    ]);
    let agent = AgentLoop::new(provider.clone(), empty_bridge());

    let (handle, rx) = agent.spawn(TurnRequest::new("s", vec![Message::user("Hi")]));
    let events = collect(rx).await;
    let outcome = handle.join().await;

    assert_eq!(provider.calls(), 1);
    assert!(matches!(outcome.error(), Some(EngineError::Validation(_))));
    assert_eq!(kinds(&events), vec!["error"]);
}
