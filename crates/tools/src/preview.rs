//! Preview Payload Store
//!
//! Tools that shrink their results for the model can keep the full payload
//! for display. The bridge writes it here under a preview key that travels
//! with the `tool_result` event; the model never sees it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreviewError {
    /// Keys are write-once
    #[error("Preview key already written: {0}")]
    AlreadyExists(String),

    #[error("Preview store unavailable: {0}")]
    Unavailable(String),
}

/// Write-once key/value store for UI payloads.
pub trait PreviewStore: Send + Sync {
    fn put(&self, key: &str, payload: Value) -> Result<(), PreviewError>;

    fn get(&self, key: &str) -> Option<Value>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryPreviewStore {
    payloads: DashMap<String, Value>,
}

impl InMemoryPreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl PreviewStore for InMemoryPreviewStore {
    fn put(&self, key: &str, payload: Value) -> Result<(), PreviewError> {
        match self.payloads.entry(key.to_string()) {
            Entry::Occupied(_) => Err(PreviewError::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(payload);
                Ok(())
            }
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.payloads.get(key).map(|v| v.value().clone())
    }
}
