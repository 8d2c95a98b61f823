//! Arbor Core
//!
//! This crate provides the runtime for Arbor: a tree of composable,
//! independently testable state models. It implements:
//!
//! - Stores that own one model's state and serialize its mutations
//! - Fine-grained change tracking by field path
//! - Named, cancellable tasks and asynchronously loaded resources
//! - Inheritable dependency environments
//! - Connections between parent and child stores, with output routing
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: field paths, observation tracking and the change registrar
//! - `store`: stores, the model trait and the handler context
//! - `graph`: the connection graph and connection declarations
//! - `task`: the task ledger, task contexts and resource slots
//! - `deps`: dependency keys and environments
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{field, Context, Model, Store};
//!
//! #[derive(Clone, Default)]
//! struct CounterState {
//!     count: i32,
//! }
//!
//! struct Counter;
//!
//! impl Model for Counter {
//!     type State = CounterState;
//!     type Action = i32;
//!     type Input = std::convert::Infallible;
//!     type Output = std::convert::Infallible;
//!
//!     fn handle(&self, ctx: &Context<'_, Self>, by: i32) {
//!         ctx.update(&field!(CounterState => count), |count| *count += by);
//!     }
//! }
//!
//! let store = Store::new(Counter, CounterState::default());
//! store.send(2)?;
//! assert_eq!(store.state().count, 2);
//! ```

pub mod config;
pub mod deps;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod store;
pub mod task;

pub use config::RuntimeConfig;
pub use deps::{DependencyEnvironment, DependencyKey};
pub use descriptor::ModelDescriptor;
pub use error::{Result, RuntimeError};
pub use graph::{Connection, ConnectionGraph, Identity, NodeInfo, StoreId};
pub use reactive::{observe, untracked, Field, FieldPath, Observation};
pub use store::{Context, Model, Store, StoreBuilder, WeakStore};
pub use task::{Resource, ResourceError, ResourcePhase, TaskContext, TaskId, TaskName};
