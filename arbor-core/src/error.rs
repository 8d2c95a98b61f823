//! Runtime errors.
//!
//! None of these are fatal. A stale reference or a refused task leaves every
//! other store untouched; the caller decides whether to care.

use crate::graph::{Identity, StoreId};
use crate::task::TaskName;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The store was destroyed; the call was a no-op.
    #[error("store {id} ({model}) has been destroyed")]
    Stale { id: StoreId, model: &'static str },

    /// Two different connections claimed the same explicit identity under
    /// one parent.
    #[error(
        "identity `{identity}` under store {parent} is bound to connection `{existing}`, \
         cannot bind it to `{requested}`"
    )]
    IdentityCollision {
        parent: StoreId,
        identity: Identity,
        existing: &'static str,
        requested: &'static str,
    },

    /// A presented connection was resolved while its field was empty.
    #[error("connection `{connection}` is not presented (its field is empty)")]
    NotPresented { connection: &'static str },

    /// A non-superseding task was started under a name that is running.
    #[error("task `{task}` is already running on store {store}")]
    AlreadyRunning { store: StoreId, task: TaskName },

    /// A cancelled task tried to start another task or apply a mutation.
    #[error("task `{task}` has been cancelled")]
    TaskCancelled { task: TaskName },

    /// No tokio runtime was available to run a task.
    #[error("no tokio runtime available to run task `{task}`")]
    NoRuntime { task: TaskName },

    /// A model handler panicked. The store remains usable.
    #[error("handler of {model} panicked: {message}")]
    HandlerPanicked { model: &'static str, message: String },

    #[error("invalid runtime config: {0}")]
    Config(String),
}

impl RuntimeError {
    /// True for the stale-reference condition.
    pub fn is_stale(&self) -> bool {
        matches!(self, RuntimeError::Stale { .. })
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
