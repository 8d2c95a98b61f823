//! Store Graph
//!
//! This module holds the structure that links stores into a tree.
//!
//! # Overview
//!
//! - A [`Connection`] declares an edge from a parent model to a child model.
//! - The [`ConnectionGraph`] registers every live store of a tree with its
//!   parent and children, so a store can find its ancestors, children and
//!   siblings by model type.
//!
//! # Design Decisions
//!
//! 1. Ownership flows strictly from parent to child. A parent keeps its
//!    children in its own edge table; the graph only keeps weak references
//!    and IDs, so no cycle can keep a destroyed subtree alive.
//!
//! 2. The graph is indexed by store ID for O(1) lookups. Ancestor and sibling
//!    walks follow the parent links stored with each entry.
//!
//! 3. Lookups hand out a strong reference only for the duration of one call
//!    into the target store.

mod connection;
mod node;
mod registry;

pub use connection::Connection;
pub(crate) use node::{AnyNode, EdgeKey};
pub use node::{Identity, NodeInfo, StoreId};
pub use registry::ConnectionGraph;
