//! Agent Engine Core
//!
//! Foundational traits, error types, and stream events for the Agent Engine
//! workspace. This crate depends on nothing else in the workspace.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `context` - Per-call tool context (`ToolContext`)
//! - `tool_trait` - Tool contract (`ToolDefinitionTrait`, `ToolExecutable`, `UnifiedTool`, `ModelResult`)
//! - `streaming` - Unified stream event types and adapter trait

pub mod context;
pub mod error;
pub mod streaming;
pub mod tool_trait;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Tool Context ───────────────────────────────────────────────────────
pub use context::ToolContext;

// ── Tool Contract ──────────────────────────────────────────────────────
pub use tool_trait::{
    ModelResult, ToolDefinitionTrait, ToolExecutable, UnifiedTool, UnifiedToolRegistry,
};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
