//! Stores
//!
//! A [`Store`] owns one model's state together with its change registrar,
//! task ledger and dependency environment. Stores form a tree: the root is
//! built by the application and every other store is created by resolving a
//! [`Connection`](crate::graph::Connection) from its parent.
//!
//! # Serialization domain
//!
//! All stores in a tree share one reentrant lock. Handlers, hooks, task
//! mutations and cross-store calls hold it while they run, so the state of
//! any store is only ever mutated by one thread at a time, in submission
//! order. Reads of a snapshot only take the store's own state lock and never
//! wait on a running handler.
//!
//! Outputs emitted during a handler are queued and routed to the parent once
//! the store's outermost handler returns, before `send` returns to its caller.

pub(crate) mod inner;
mod context;
mod handle;
mod model;

pub use context::Context;
pub use handle::{Store, StoreBuilder, WeakStore};
pub use model::Model;
