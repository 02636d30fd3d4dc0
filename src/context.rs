//! Execution contexts: the independent timelines that own a call stack
//!
//! A context is a thread, a GPU queue, an API lane, an MPI rank, or any other
//! place where enter/leave events form a stack. The engine only ever refers to
//! a context by its numeric id; names and kinds live in a [`ContextRegistry`]
//! that hosts fill in for display and export.

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an execution context
///
/// Stable for the lifetime of a trace. Cheap to copy, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[serde(transparent)]
pub struct ExecutionContext(pub u64);

impl ExecutionContext {
    /// Create a context from its raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl From<u64> for ExecutionContext {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// What kind of timeline a context represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// OS thread
    #[default]
    Thread,
    /// GPU hardware queue
    GpuQueue,
    /// GPU stream (software queue)
    GpuStream,
    /// Host API lane (HIP, HSA, ...)
    ApiLane,
    /// Message-passing rank / location
    Rank,
    /// Anything else
    Other,
}

/// Display metadata attached to a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Human-readable name (e.g. "worker-3", "GPU0/queue1")
    pub name: String,
    /// Timeline kind
    pub kind: ContextKind,
}

/// Names and kinds of the contexts seen in one analysis run
///
/// Purely descriptive: correctness never depends on it.
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    contexts: FnvHashMap<ExecutionContext, ContextInfo>,
}

impl ContextRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or rename) a context
    pub fn register(&mut self, context: ExecutionContext, name: impl Into<String>, kind: ContextKind) {
        self.contexts.insert(
            context,
            ContextInfo {
                name: name.into(),
                kind,
            },
        );
    }

    /// Look up the metadata for a context
    pub fn get(&self, context: ExecutionContext) -> Option<&ContextInfo> {
        self.contexts.get(&context)
    }

    /// Display name, falling back to the numeric id
    pub fn display_name(&self, context: ExecutionContext) -> String {
        self.contexts
            .get(&context)
            .map(|info| info.name.clone())
            .unwrap_or_else(|| context.to_string())
    }

    /// Number of registered contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True when nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        assert_eq!(ExecutionContext::new(7).to_string(), "ctx-7");
    }

    #[test]
    fn test_registry_falls_back_to_id() {
        let mut registry = ContextRegistry::new();
        registry.register(ExecutionContext(1), "main", ContextKind::Thread);

        assert_eq!(registry.display_name(ExecutionContext(1)), "main");
        assert_eq!(registry.display_name(ExecutionContext(2)), "ctx-2");
        assert_eq!(registry.get(ExecutionContext(1)).unwrap().kind, ContextKind::Thread);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_context_serializes_as_number() {
        let json = serde_json::to_string(&ExecutionContext(42)).unwrap();
        assert_eq!(json, "42");
    }
}
