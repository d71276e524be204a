//! Shared stream driver.
//!
//! Every provider hands its HTTP body to [`drive_stream`], which splits it
//! into lines, runs them through the vendor's `StreamAdapter`, forwards
//! text and reasoning deltas, and collects tool calls, usage and the stop
//! reason into an `LlmResponse`. Adapters stay pure translators and no
//! provider re-implements accumulation.

use std::collections::HashSet;
use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_engine_core::streaming::{StreamAdapter, UnifiedStreamEvent};

use crate::retry::parse_retry_hint_ms;
use crate::tool_names::ToolNameMap;
use crate::types::{LlmError, LlmResponse, LlmResult, StopReason, ToolCall};
use crate::usage::{UsageAccumulator, UsageReport};

/// Map an in-stream vendor error event to an `LlmError`.
pub fn stream_error(message: String, code: Option<&str>) -> LlmError {
    let code = code.unwrap_or_default().to_lowercase();
    if code.contains("rate_limit") || code.contains("429") || code.contains("resource_exhausted") {
        LlmError::RateLimited {
            retry_after_ms: parse_retry_hint_ms(&message),
            message,
        }
    } else if code.contains("overloaded")
        || code.contains("api_error")
        || code.contains("server")
        || code.contains("internal")
        || code.contains("unavailable")
    {
        LlmError::ServerError {
            message,
            status: None,
        }
    } else if code.contains("invalid_request") {
        LlmError::InvalidRequest { message }
    } else {
        LlmError::Other { message }
    }
}

struct StreamCollector<'a> {
    names: &'a ToolNameMap,
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCall>,
    seen_call_ids: HashSet<String>,
    usage: UsageAccumulator,
    stop_reason: Option<StopReason>,
}

impl<'a> StreamCollector<'a> {
    fn new(names: &'a ToolNameMap) -> Self {
        Self {
            names,
            content: String::new(),
            thinking: String::new(),
            tool_calls: Vec::new(),
            seen_call_ids: HashSet::new(),
            usage: UsageAccumulator::new(),
            stop_reason: None,
        }
    }

    async fn forward(
        &self,
        event: UnifiedStreamEvent,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> LlmResult<()> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        // A dropped receiver means nobody is listening; keep collecting.
        let _ = tx.send(event).await;
        Ok(())
    }

    async fn handle(
        &mut self,
        event: UnifiedStreamEvent,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> LlmResult<()> {
        match event {
            UnifiedStreamEvent::TextDelta { ref content } => {
                if content.is_empty() {
                    return Ok(());
                }
                self.content.push_str(content);
                self.forward(event, tx, cancel).await
            }
            UnifiedStreamEvent::ThinkingDelta { ref content } => {
                if content.is_empty() {
                    return Ok(());
                }
                self.thinking.push_str(content);
                self.forward(event, tx, cancel).await
            }
            UnifiedStreamEvent::ToolCall {
                tool_id,
                tool_name,
                arguments,
            } => {
                if !self.seen_call_ids.insert(tool_id.clone()) {
                    tracing::debug!(tool_id = %tool_id, "Dropping duplicate tool call");
                    return Ok(());
                }
                let original = self.names.resolve(&tool_name).to_string();
                self.tool_calls
                    .push(ToolCall::from_raw_arguments(tool_id, original, &arguments));
                Ok(())
            }
            UnifiedStreamEvent::Usage { .. } => {
                if let Some(report) = UsageReport::from_event(&event) {
                    self.usage.merge(&report);
                }
                Ok(())
            }
            UnifiedStreamEvent::Complete { stop_reason } => {
                if let Some(reason) = stop_reason {
                    self.stop_reason = Some(StopReason::from(reason.as_str()));
                }
                Ok(())
            }
            UnifiedStreamEvent::Error { message, code } => {
                Err(stream_error(message, code.as_deref()))
            }
            UnifiedStreamEvent::ToolStart { .. }
            | UnifiedStreamEvent::ToolResult { .. }
            | UnifiedStreamEvent::ToolError { .. }
            | UnifiedStreamEvent::StepFinish { .. } => Ok(()),
        }
    }

    async fn feed_line(
        &mut self,
        adapter: &mut dyn StreamAdapter,
        line: &str,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
        cancel: &CancellationToken,
    ) -> LlmResult<()> {
        match adapter.adapt(line) {
            Ok(events) => {
                for event in events {
                    self.handle(event, tx, cancel).await?;
                }
            }
            Err(e) => {
                tracing::warn!(
                    provider = adapter.provider_name(),
                    error = %e,
                    "Skipping unparseable stream line"
                );
            }
        }
        Ok(())
    }

    fn into_response(self, model: &str) -> LlmResponse {
        let stop_reason = match self.stop_reason {
            Some(StopReason::EndTurn) | None if !self.tool_calls.is_empty() => StopReason::ToolUse,
            Some(reason) => reason,
            None => StopReason::EndTurn,
        };
        LlmResponse {
            content: (!self.content.is_empty()).then_some(self.content),
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage.finish(),
            model: model.to_string(),
        }
    }
}

/// Drive a line-oriented (SSE or NDJSON) byte stream through `adapter`.
///
/// Cancellation is polled between chunks; once observed, consumption stops
/// and nothing further is forwarded.
pub async fn drive_stream<S, B, E>(
    stream: S,
    adapter: &mut dyn StreamAdapter,
    names: &ToolNameMap,
    tx: &mpsc::Sender<UnifiedStreamEvent>,
    cancel: &CancellationToken,
    model: &str,
) -> LlmResult<LlmResponse>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    adapter.reset();
    let mut collector = StreamCollector::new(names);
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(LlmError::network)?;
        buffer.extend_from_slice(chunk.as_ref());

        // Split on raw bytes so multi-byte characters spanning chunks survive.
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            collector.feed_line(adapter, line, tx, cancel).await?;
        }
    }

    if !buffer.is_empty() {
        let tail = String::from_utf8_lossy(&buffer).into_owned();
        if !tail.trim().is_empty() {
            collector.feed_line(adapter, tail.trim_end(), tx, cancel).await?;
        }
    }
    for event in adapter.finish() {
        collector.handle(event, tx, cancel).await?;
    }

    Ok(collector.into_response(model))
}
