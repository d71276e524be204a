//! Agent Engine Tools
//!
//! The execution half of the tool bridge:
//! - `ToolBridge` - validates arguments, runs tools, contains failures and panics
//! - `ToolCallResult` / `ToolFailure` - per-call outcome fed back to the model
//! - `PreviewStore` - write-once store for UI payloads the model never sees
//!
//! Tools themselves implement the contract in `agent-engine-core`
//! (`ToolDefinitionTrait` + `ToolExecutable`).

pub mod bridge;
pub mod preview;
pub mod result;

pub use bridge::{validate_arguments, ToolBridge};
pub use preview::{InMemoryPreviewStore, PreviewError, PreviewStore};
pub use result::{ToolCallResult, ToolFailure, ToolFailureKind};
