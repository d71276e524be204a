//! Tool Contract
//!
//! The shape every tool must have for the engine to drive it:
//!
//! - `ToolDefinitionTrait` - name, description, parameter schema
//! - `ToolExecutable` - `execute(ctx, args)` plus the optional result-shrinking
//!   transform `to_model_result`
//! - `UnifiedTool` - combined trait (auto-implemented via blanket impl)
//! - `UnifiedToolRegistry` - O(1) lookup registry with ordered iteration
//!
//! The engine only ever calls `execute` and `to_model_result`; it never
//! inspects tool internals.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ToolContext;
use crate::error::{CoreError, CoreResult};

// ============================================================================
// Trait Definitions
// ============================================================================

/// Tool definition metadata trait.
pub trait ToolDefinitionTrait: Send + Sync {
    /// Unique name of this tool as the application knows it.
    ///
    /// May contain characters a vendor rejects (`.`, `:`, spaces); the tool
    /// bridge rewrites it to a safe name on the wire and maps it back.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema describing input parameters.
    ///
    /// ```json
    /// {
    ///   "type": "object",
    ///   "properties": {
    ///     "city": { "type": "string", "description": "City name" }
    ///   },
    ///   "required": ["city"]
    /// }
    /// ```
    fn parameters_schema(&self) -> Value;
}

/// The compact form of a tool result.
///
/// `minimal` is what the model sees. `ui` is a richer payload for display
/// that is written to the preview store under `preview_key` and never sent
/// to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub minimal: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_key: Option<String>,
}

impl ModelResult {
    /// A result with only a model-visible payload.
    pub fn minimal(minimal: Value) -> Self {
        Self {
            minimal,
            ui: None,
            preview_key: None,
        }
    }

    /// Attach a UI payload stored out-of-band.
    pub fn with_ui(mut self, ui: Value) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Pin the preview key instead of letting the bridge generate one.
    pub fn with_preview_key(mut self, key: impl Into<String>) -> Self {
        self.preview_key = Some(key.into());
        self
    }
}

/// Tool execution trait.
#[async_trait]
pub trait ToolExecutable: Send + Sync {
    /// Execute the tool with the given context and arguments.
    ///
    /// # Returns
    /// - `Ok(Value)` - The tool's raw output
    /// - `Err(CoreError)` - If the tool execution failed
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value>;

    /// Split a raw result into a model-visible payload and an optional UI
    /// payload. Tools without a transform send the raw result as-is.
    fn to_model_result(&self, _raw: &Value) -> Option<ModelResult> {
        None
    }
}

/// Combined trait for tools that provide both definition and execution.
pub trait UnifiedTool: ToolDefinitionTrait + ToolExecutable {}

impl<T: ToolDefinitionTrait + ToolExecutable> UnifiedTool for T {}

// ============================================================================
// UnifiedToolRegistry
// ============================================================================

/// Registry for `UnifiedTool` implementations, keyed by original tool name.
pub struct UnifiedToolRegistry {
    tools: HashMap<String, Arc<dyn UnifiedTool>>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

impl UnifiedToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn UnifiedTool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with_tool(mut self, tool: Arc<dyn UnifiedTool>) -> Self {
        self.register(tool);
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn UnifiedTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn UnifiedTool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// Execute a tool by name.
    ///
    /// Returns `Err(CoreError::NotFound)` if the tool is not registered.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => Err(CoreError::not_found(format!("Tool not found: {}", name))),
        }
    }
}

impl Default for UnifiedToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UnifiedToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
