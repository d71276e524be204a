//! Tool Context
//!
//! The `meta` half of a tool invocation: which session, step and call a
//! tool is running for. Tools receive a read-only `ToolContext`; they can
//! neither mutate the conversation nor influence loop control.

/// Context passed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    session_id: String,
    tool_call_id: String,
    step_index: u32,
    provider: Option<String>,
    model: Option<String>,
}

impl ToolContext {
    /// Create a new ToolContext.
    pub fn new(
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        step_index: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
            step_index,
            provider: None,
            model: None,
        }
    }

    /// Record which provider/model requested the call.
    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the vendor-assigned call identifier.
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// 1-based step index within the turn.
    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}
