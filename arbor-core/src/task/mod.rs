//! Asynchronous Work
//!
//! Stores start asynchronous work as named tasks recorded in their
//! [`TaskLedger`]. Tasks run on tokio and reach back into their store only
//! through a [`TaskContext`].

mod context;
mod ledger;
mod resource;

pub use context::TaskContext;
pub(crate) use context::TaskScope;
pub use ledger::{TaskId, TaskLedger, TaskName};
pub use resource::{Resource, ResourceError, ResourcePhase};
