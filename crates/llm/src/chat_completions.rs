//! Chat-completions request building shared by OpenAI, DeepSeek and GLM.

use serde_json::{json, Value};

use crate::provider::StreamRequest;
use crate::tool_names::ToolNameMap;
use crate::tool_schema::to_openai_tool;
use crate::types::{
    Message, MessageContent, MessageRole, ProviderConfig, ToolCallMode, ToolDefinition,
};

/// Body knobs that differ between chat-completions vendors.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChatBodyOptions {
    /// Request a trailing usage chunk
    pub include_usage: bool,
    /// Reasoning models reject `temperature` and take `reasoning_effort`
    pub reasoning_model: bool,
}

/// Convert one history message. Tool results expand into one `tool`
/// message per result, so the return is a list.
fn convert_message(message: &Message, names: &ToolNameMap) -> Vec<Value> {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };

    let mut out = Vec::new();
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for content in &message.content {
        match content {
            MessageContent::Text { text } => text_parts.push(text),
            MessageContent::ToolUse { id, name, input } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": names.outbound(name),
                    "arguments": input.to_string(),
                }
            })),
            MessageContent::ToolResult {
                tool_use_id,
                content,
                ..
            } => out.push(json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            })),
            // Replayed reasoning is rejected by DeepSeek and ignored elsewhere.
            MessageContent::Thinking { .. } => {}
        }
    }

    let text = text_parts.join("\n");
    if !tool_calls.is_empty() {
        // Some compatible APIs require `content` even when only tools are called.
        let content = if text.is_empty() { Value::Null } else { json!(text) };
        out.push(json!({
            "role": role,
            "content": content,
            "tool_calls": tool_calls,
        }));
    } else if !text.is_empty() {
        out.push(json!({ "role": role, "content": text }));
    }
    out
}

pub(crate) fn convert_messages(
    messages: &[Message],
    system: Option<&str>,
    names: &ToolNameMap,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        out.push(json!({ "role": "system", "content": system }));
    }
    for message in messages {
        out.extend(convert_message(message, names));
    }
    out
}

/// Build a streaming chat-completions body. `tools` are already renamed to
/// their safe names.
pub(crate) fn build_chat_body(
    config: &ProviderConfig,
    request: &StreamRequest,
    names: &ToolNameMap,
    tools: &[ToolDefinition],
    options: ChatBodyOptions,
) -> Value {
    let mut body = json!({
        "model": config.model,
        "messages": convert_messages(&request.messages, request.system.as_deref(), names),
        "max_tokens": config.max_tokens,
        "stream": true,
    });

    if options.reasoning_model {
        if let Some(effort) = request
            .options
            .reasoning_effort_override
            .as_ref()
            .or(config.reasoning_effort.as_ref())
        {
            body["reasoning_effort"] = json!(effort);
        }
    } else {
        body["temperature"] = json!(request
            .options
            .temperature_override
            .unwrap_or(config.temperature));
    }

    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(to_openai_tool).collect());
        match request.options.tool_call_mode {
            ToolCallMode::Auto => {}
            ToolCallMode::Required => body["tool_choice"] = json!("required"),
            ToolCallMode::None => body["tool_choice"] = json!("none"),
        }
    }

    if options.include_usage {
        body["stream_options"] = json!({ "include_usage": true });
    }

    merge_options(&mut body, config);
    body
}

/// Merge `ProviderConfig::options` into the top level of a request body.
pub(crate) fn merge_options(body: &mut Value, config: &ProviderConfig) {
    if let Some(obj) = body.as_object_mut() {
        for (key, value) in &config.options {
            obj.insert(key.clone(), value.clone());
        }
    }
}
