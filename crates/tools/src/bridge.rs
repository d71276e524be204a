//! Tool Bridge
//!
//! Runs vendor-requested tool calls against the application's tools:
//!
//! 1. Malformed arguments and schema violations are rejected before the
//!    tool runs.
//! 2. The tool executes; errors and panics become a structured failure.
//!    A panic in the result transform is contained the same way.
//! 3. Tools with a `to_model_result` transform get their result split into
//!    the model-visible part and a UI payload kept in the preview store.
//!
//! Name sanitization happens on the provider side (`ToolNameMap`); by the
//! time a call reaches the bridge it carries the original name again.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use agent_engine_core::context::ToolContext;
use agent_engine_core::tool_trait::{UnifiedTool, UnifiedToolRegistry};
use agent_engine_llm::{ParameterSchema, ToolCall, ToolDefinition};

use crate::preview::PreviewStore;
use crate::result::{ToolCallResult, ToolFailure};

/// Executes tool calls for one engine.
#[derive(Clone)]
pub struct ToolBridge {
    registry: Arc<UnifiedToolRegistry>,
    previews: Option<Arc<dyn PreviewStore>>,
}

impl ToolBridge {
    pub fn new(registry: Arc<UnifiedToolRegistry>) -> Self {
        Self {
            registry,
            previews: None,
        }
    }

    /// Keep UI payloads of shrunk results in `store`.
    pub fn with_preview_store(mut self, store: Arc<dyn PreviewStore>) -> Self {
        self.previews = Some(store);
        self
    }

    pub fn registry(&self) -> &UnifiedToolRegistry {
        &self.registry
    }

    /// Vendor-neutral definitions of every registered tool, in registration
    /// order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .tools()
            .map(|tool| {
                let schema = tool.parameters_schema();
                let input_schema = ParameterSchema::from_value(&schema).unwrap_or_else(|e| {
                    tracing::warn!(
                        tool = tool.name(),
                        error = %e,
                        "Unsupported parameter schema, advertising an empty object"
                    );
                    ParameterSchema::object(None, Default::default(), vec![])
                });
                ToolDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    input_schema,
                }
            })
            .collect()
    }

    /// Execute one call. Never fails: every problem is reported in the
    /// returned result so the model can react to it.
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolCallResult {
        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(tool = %call.name, call_id = %call.id, "Model called an unknown tool");
            return ToolCallResult::failure(&call.id, &call.name, ToolFailure::not_found(&call.name));
        };

        if let Some(parse_error) = &call.parse_error {
            return ToolCallResult::failure(
                &call.id,
                &call.name,
                ToolFailure::validation(parse_error.clone()),
            );
        }
        if let Err(message) = validate_arguments(&tool.parameters_schema(), &call.arguments) {
            tracing::debug!(tool = %call.name, call_id = %call.id, error = %message, "Rejected tool arguments");
            return ToolCallResult::failure(&call.id, &call.name, ToolFailure::validation(message));
        }

        let started = std::time::Instant::now();
        let raw = match AssertUnwindSafe(tool.execute(ctx, call.arguments.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, error = %e, "Tool failed");
                let failure = if e.is_validation() {
                    ToolFailure::validation(e.to_string())
                } else {
                    ToolFailure::execution(e.to_string())
                };
                return ToolCallResult::failure(&call.id, &call.name, failure);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %call.name, call_id = %call.id, panic = %message, "Tool panicked");
                return ToolCallResult::failure(
                    &call.id,
                    &call.name,
                    ToolFailure::execution(format!("tool panicked: {}", message)),
                );
            }
        };
        tracing::debug!(
            tool = %call.name,
            call_id = %call.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool finished"
        );

        self.shrink(tool.as_ref(), call, raw)
    }

    fn shrink(&self, tool: &dyn UnifiedTool, call: &ToolCall, raw: Value) -> ToolCallResult {
        let model_result =
            match std::panic::catch_unwind(AssertUnwindSafe(|| tool.to_model_result(&raw))) {
                Ok(Some(model_result)) => model_result,
                Ok(None) => return ToolCallResult::success(&call.id, &call.name, raw),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(tool = %call.name, call_id = %call.id, panic = %message, "Tool result transform panicked");
                    return ToolCallResult::failure(
                        &call.id,
                        &call.name,
                        ToolFailure::execution(format!("tool result transform panicked: {}", message)),
                    );
                }
            };

        let mut result = ToolCallResult::success(&call.id, &call.name, model_result.minimal);
        if let Some(ui) = model_result.ui {
            match &self.previews {
                Some(store) => {
                    let key = model_result
                        .preview_key
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    match store.put(&key, ui) {
                        Ok(()) => result.preview_key = Some(key),
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "Could not store preview payload")
                        }
                    }
                }
                None => {
                    tracing::debug!(tool = %call.name, "No preview store configured, UI payload dropped")
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("tools", &self.registry.names())
            .field("has_preview_store", &self.previews.is_some())
            .finish()
    }
}

/// Check `args` against the top level of a tool's JSON schema: it must be
/// an object, carry every required key, and declared property types and
/// enums must match.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err(format!(
            "arguments must be a JSON object, got {}",
            json_type(args)
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument `{}`", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in object {
        let Some(property) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !matches_type(expected, value) {
                return Err(format!(
                    "argument `{}` must be {}, got {}",
                    key,
                    expected,
                    json_type(value)
                ));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("argument `{}` must be one of {}", key, Value::Array(allowed.clone())));
            }
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
