//! Tool Name Sanitization
//!
//! Vendors restrict tool names (charset, length, leading character). Tools
//! are advertised under a *safe name* and every call coming back is mapped
//! to the original name through a `ToolNameMap` that lives for exactly one
//! streaming session.
//!
//! Collision contract: when two distinct originals sanitize to the same
//! safe name, the first registrant keeps the mapping, a warning is always
//! logged, and the later tool is not advertised.

use std::collections::HashMap;

use crate::types::ToolDefinition;

/// A vendor's tool-name constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingRules {
    pub max_len: usize,
    /// Whether `-` is allowed in addition to `[A-Za-z0-9_]`
    pub allow_dash: bool,
    pub must_start_with_letter: bool,
}

impl NamingRules {
    /// `^[a-zA-Z0-9_-]{1,64}$` (Anthropic, OpenAI-compatible vendors).
    pub const PERMISSIVE: NamingRules = NamingRules {
        max_len: 64,
        allow_dash: true,
        must_start_with_letter: false,
    };

    /// Alphanumeric plus underscore, leading letter, at most 64 chars.
    pub const STRICT: NamingRules = NamingRules {
        max_len: 64,
        allow_dash: false,
        must_start_with_letter: true,
    };

    fn allowed(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || (self.allow_dash && c == '-')
    }

    /// Whether `name` already satisfies these rules.
    pub fn accepts(&self, name: &str) -> bool {
        !name.is_empty()
            && name.len() <= self.max_len
            && name.chars().all(|c| self.allowed(c))
            && (!self.must_start_with_letter
                || name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
    }

    /// Rewrite `name` so it satisfies these rules.
    ///
    /// Disallowed characters become `_`, a `t_` prefix is added when a
    /// leading letter is required, and the result is truncated.
    pub fn sanitize(&self, name: &str) -> String {
        let mut safe: String = name
            .chars()
            .map(|c| if self.allowed(c) { c } else { '_' })
            .collect();

        if safe.is_empty() {
            safe.push_str("tool");
        }
        if self.must_start_with_letter
            && !safe.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            safe.insert_str(0, "t_");
        }
        // Only ASCII remains, so byte truncation is char-safe.
        safe.truncate(self.max_len);
        safe
    }
}

impl Default for NamingRules {
    fn default() -> Self {
        Self::PERMISSIVE
    }
}

/// A rejected registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCollision {
    pub safe_name: String,
    /// Original name that keeps the mapping
    pub kept: String,
    /// Original name that was not advertised
    pub rejected: String,
}

/// Bidirectional safe <-> original name map for one streaming session.
#[derive(Debug, Clone)]
pub struct ToolNameMap {
    rules: NamingRules,
    safe_to_original: HashMap<String, String>,
    original_to_safe: HashMap<String, String>,
    collisions: Vec<NameCollision>,
}

impl ToolNameMap {
    pub fn new(rules: NamingRules) -> Self {
        Self {
            rules,
            safe_to_original: HashMap::new(),
            original_to_safe: HashMap::new(),
            collisions: Vec::new(),
        }
    }

    /// Register every tool and return the definitions to advertise, renamed
    /// to their safe names. Colliding tools are left out.
    pub fn advertise(rules: NamingRules, tools: &[ToolDefinition]) -> (Self, Vec<ToolDefinition>) {
        let mut map = Self::new(rules);
        let advertised = tools
            .iter()
            .filter_map(|tool| {
                map.register(&tool.name).map(|safe| ToolDefinition {
                    name: safe,
                    ..tool.clone()
                })
            })
            .collect();
        (map, advertised)
    }

    /// Register an original name, returning its safe name.
    ///
    /// Returns `None` when the safe name is already owned by a different
    /// original; the existing mapping is left untouched.
    pub fn register(&mut self, original: &str) -> Option<String> {
        if let Some(existing) = self.original_to_safe.get(original) {
            return Some(existing.clone());
        }

        let safe = self.rules.sanitize(original);
        if let Some(owner) = self.safe_to_original.get(&safe) {
            tracing::warn!(
                safe_name = %safe,
                kept = %owner,
                rejected = %original,
                "Tool name collision after sanitization; keeping first registrant"
            );
            self.collisions.push(NameCollision {
                safe_name: safe,
                kept: owner.clone(),
                rejected: original.to_string(),
            });
            return None;
        }

        if safe != original {
            tracing::debug!(original = %original, safe_name = %safe, "Sanitized tool name");
        }
        self.safe_to_original.insert(safe.clone(), original.to_string());
        self.original_to_safe.insert(original.to_string(), safe.clone());
        Some(safe)
    }

    /// Safe name advertised for `original`.
    pub fn to_safe(&self, original: &str) -> Option<&str> {
        self.original_to_safe.get(original).map(String::as_str)
    }

    /// Original name for a safe name coming back from the vendor.
    pub fn to_original(&self, safe: &str) -> Option<&str> {
        self.safe_to_original.get(safe).map(String::as_str)
    }

    /// Original name if known, otherwise the name as received.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.to_original(name).unwrap_or(name)
    }

    /// Safe name if known, otherwise the sanitized form of `original`.
    ///
    /// Used when replaying history whose tool-use blocks carry original names.
    pub fn outbound(&self, original: &str) -> String {
        self.to_safe(original)
            .map(str::to_string)
            .unwrap_or_else(|| self.rules.sanitize(original))
    }

    pub fn collisions(&self) -> &[NameCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.safe_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.safe_to_original.is_empty()
    }
}
