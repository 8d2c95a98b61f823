//! The handle a running task uses to reach its store.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ledger::TaskName;
use crate::deps::{ClockKey, DependencyEnvironment, DependencyKey};
use crate::error::{Result, RuntimeError};
use crate::graph::StoreId;
use crate::store::inner::StoreCore;
use crate::store::{Context, Model};

/// Name and cancellation token of the task a transaction runs for.
#[derive(Debug, Clone)]
pub(crate) struct TaskScope {
    pub(crate) name: TaskName,
    pub(crate) token: CancellationToken,
}

/// Passed to every task started from a [`Context`].
///
/// Holds only a weak reference to the store. Every mutation goes through
/// [`TaskContext::apply`], which rejoins the store's serialization domain
/// and refuses to run once the task has been cancelled or the store is gone.
///
/// ```rust,ignore
/// ctx.task("refresh", |task| async move {
///     task.sleep(Duration::from_secs(2)).await;
///     let _ = task.apply(|ctx| ctx.set(&count, 1));
/// })?;
/// ```
pub struct TaskContext<M: Model> {
    core: Weak<StoreCore<M>>,
    store: StoreId,
    model: &'static str,
    scope: TaskScope,
    env: DependencyEnvironment,
}

impl<M: Model> TaskContext<M> {
    pub(crate) fn new(
        core: Weak<StoreCore<M>>,
        store: StoreId,
        scope: TaskScope,
        env: DependencyEnvironment,
    ) -> Self {
        Self {
            core,
            store,
            model: M::name(),
            scope,
            env,
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.scope.name
    }

    pub fn store_id(&self) -> StoreId {
        self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.token.is_cancelled()
    }

    /// Resolves once this task is cancelled.
    pub async fn cancelled(&self) {
        self.scope.token.cancelled().await
    }

    /// Run `f` inside the store's serialization domain.
    ///
    /// Fails with [`RuntimeError::TaskCancelled`] once the task has been
    /// cancelled and with [`RuntimeError::Stale`] once the store is gone.
    pub fn apply<R>(&self, f: impl FnOnce(&Context<'_, M>) -> R) -> Result<R> {
        if self.is_cancelled() {
            return Err(RuntimeError::TaskCancelled {
                task: self.scope.name.clone(),
            });
        }
        let core = self.core.upgrade().ok_or(RuntimeError::Stale {
            id: self.store,
            model: self.model,
        })?;
        core.transaction(Some(&self.scope), f)
    }

    /// Emit an output from the store.
    pub fn output(&self, output: M::Output) -> Result<()> {
        self.apply(|ctx| ctx.output(output))
    }

    /// Dispatch an action on the store.
    pub fn send(&self, action: M::Action) -> Result<()> {
        self.apply(|ctx| ctx.send(action))?
    }

    /// The value of `K` as it was when the task started.
    pub fn dependency<K: DependencyKey>(&self) -> K::Value {
        self.env.get::<K>()
    }

    /// Sleep on the store's clock.
    pub async fn sleep(&self, duration: Duration) {
        let clock = self.dependency::<ClockKey>();
        clock.sleep(duration).await
    }
}

impl<M: Model> Clone for TaskContext<M> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            store: self.store,
            model: self.model,
            scope: self.scope.clone(),
            env: self.env.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for TaskContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("store", &self.store)
            .field("model", &self.model)
            .field("task", &self.scope.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
