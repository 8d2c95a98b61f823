//! Graph Nodes
//!
//! This module defines the identifiers and the type-erased node interface
//! that live in the connection graph.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

/// Unique identifier for a store in the graph.
///
/// Assigned once at construction and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    /// Generate a new unique store ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Explicit identity of a keyed child, such as a row's ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<u64> for Identity {
    fn from(value: u64) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl From<usize> for Identity {
    fn from(value: usize) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl From<i32> for Identity {
    fn from(value: i32) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

impl From<Uuid> for Identity {
    fn from(value: Uuid) -> Self {
        Self(Arc::from(value.to_string()))
    }
}

/// Key of a child edge within its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum EdgeKey {
    /// The single slot of a connection resolved without an identity.
    Slot(&'static str),
    /// A keyed child; identities are unique across all of a parent's
    /// connections.
    Keyed(Identity),
}

impl EdgeKey {
    pub(crate) fn identity(&self) -> Option<&Identity> {
        match self {
            EdgeKey::Slot(_) => None,
            EdgeKey::Keyed(identity) => Some(identity),
        }
    }
}

/// Type-erased view of a store, as held by the graph and by parent edges.
pub(crate) trait AnyNode: Send + Sync + 'static {
    fn id(&self) -> StoreId;

    fn model_type(&self) -> TypeId;

    fn model_name(&self) -> &'static str;

    fn is_alive(&self) -> bool;

    /// Run the disappear hook, cancel all work and destroy descendants.
    fn destroy(self: Arc<Self>);

    /// Drop the edge to `child` without destroying it. Returns false if
    /// there was no such edge.
    fn forget_child(&self, child: StoreId) -> bool;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A read-only snapshot of one graph node, for debugging tools.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NodeInfo {
    pub id: u64,
    pub model: &'static str,
    pub parent: Option<u64>,
    pub identity: Option<String>,
    pub children: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_ids_are_unique() {
        let id1 = StoreId::new();
        let id2 = StoreId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn identities_from_different_sources_compare_by_text() {
        assert_eq!(Identity::from(7u64), Identity::from("7"));
        assert_eq!(Identity::from(7usize), Identity::from(7i32));
        assert_ne!(Identity::from("a"), Identity::from("b"));
    }

    #[test]
    fn only_keyed_edges_carry_identity() {
        assert!(EdgeKey::Slot("detail").identity().is_none());
        assert_eq!(
            EdgeKey::Keyed(Identity::from("row-1")).identity(),
            Some(&Identity::from("row-1"))
        );
    }
}
