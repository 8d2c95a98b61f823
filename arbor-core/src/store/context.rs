//! Handler context: the dispatcher's view of one store.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::inner::StoreCore;
use super::{Model, Store};
use crate::deps::DependencyKey;
use crate::error::Result;
use crate::graph::{Connection, EdgeKey, Identity, StoreId};
use crate::reactive::{Field, FieldPath, ObservationContext};
use crate::task::{Resource, ResourceError, TaskContext, TaskId, TaskName, TaskScope};

/// Access to a store from inside its serialization domain.
///
/// A context only exists while a handler, hook, task mutation or
/// cross-store call is running, and it cannot outlive that call.
pub struct Context<'a, M: Model> {
    core: &'a Arc<StoreCore<M>>,
    scope: Option<&'a TaskScope>,
}

impl<'a, M: Model> Context<'a, M> {
    pub(crate) fn new(core: &'a Arc<StoreCore<M>>, scope: Option<&'a TaskScope>) -> Self {
        Self { core, scope }
    }

    pub fn id(&self) -> StoreId {
        self.core.id
    }

    pub fn model(&self) -> &M {
        &self.core.model
    }

    /// Read a field, recording the read with any enclosing observation.
    pub fn get<V: Clone + 'static>(&self, field: &Field<M::State, V>) -> V {
        ObservationContext::track(&self.core.registrar, field.path());
        field.get(&self.core.state.lock()).clone()
    }

    /// Borrow the state without tracking. `f` must not touch this store.
    pub fn read<R>(&self, f: impl FnOnce(&M::State) -> R) -> R {
        f(&self.core.state.lock())
    }

    /// An untracked snapshot of the whole state.
    pub fn state(&self) -> M::State {
        self.core.state.lock().clone()
    }

    /// Write a field. Returns true if the value changed; an equal value
    /// notifies nobody.
    pub fn set<V: PartialEq + 'static>(&self, field: &Field<M::State, V>, value: V) -> bool {
        self.core.write(field.path(), |state| {
            let slot = field.get_mut(state);
            if *slot == value {
                return false;
            }
            *slot = value;
            true
        })
    }

    /// Edit a field in place, notifying only if it ended up different.
    pub fn update<V>(&self, field: &Field<M::State, V>, f: impl FnOnce(&mut V)) -> bool
    where
        V: Clone + PartialEq + 'static,
    {
        self.core.write(field.path(), |state| {
            let slot = field.get_mut(state);
            let before = slot.clone();
            f(&mut *slot);
            *slot != before
        })
    }

    /// Edit a field in place and always notify.
    pub fn modify<V: 'static>(&self, field: &Field<M::State, V>, f: impl FnOnce(&mut V)) {
        self.core.write(field.path(), |state| {
            f(field.get_mut(state));
            true
        });
    }

    /// Overwrite a field and always notify.
    pub fn replace<V: 'static>(&self, field: &Field<M::State, V>, value: V) {
        self.modify(field, |slot| *slot = value);
    }

    /// Overwrite the whole state.
    pub fn set_state(&self, state: M::State) -> bool
    where
        M::State: PartialEq,
    {
        self.core.write(&FieldPath::root(), |current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    /// Emit an output. It is routed once the current handler returns.
    pub fn output(&self, output: M::Output) {
        self.core.emit(output);
    }

    /// Dispatch an action on this store, nested in the current handler.
    pub fn send(&self, action: M::Action) -> Result<()> {
        self.core.dispatch(self.scope, action)
    }

    pub fn send_input(&self, input: M::Input) -> Result<()> {
        self.core.dispatch_input(self.scope, input)
    }

    /// Start a task that replaces any running task of the same name.
    pub fn task<F, Fut>(&self, name: impl Into<TaskName>, work: F) -> Result<TaskId>
    where
        F: FnOnce(TaskContext<M>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_task(name, true, work)
    }

    /// Start a long-running task that keeps going until it is cancelled.
    ///
    /// Fails with [`RuntimeError::AlreadyRunning`](crate::RuntimeError::AlreadyRunning)
    /// if a task of the same name is running.
    pub fn background<F, Fut>(&self, name: impl Into<TaskName>, work: F) -> Result<TaskId>
    where
        F: FnOnce(TaskContext<M>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_task(name, false, work)
    }

    /// Start a task. A task started from inside another task is cancelled
    /// along with it.
    pub fn run_task<F, Fut>(
        &self,
        name: impl Into<TaskName>,
        supersede: bool,
        work: F,
    ) -> Result<TaskId>
    where
        F: FnOnce(TaskContext<M>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let core = Arc::downgrade(self.core);
        let store = self.core.id;
        let env = self.core.env.read().clone();
        let scope_name = name.clone();

        self.core
            .ledger
            .run(name, supersede, self.scope.map(|scope| &scope.token), move |token| {
                let scope = TaskScope {
                    name: scope_name,
                    token,
                };
                work(TaskContext::new(core, store, scope, env))
            })
    }

    pub fn cancel_task(&self, name: impl Into<TaskName>) -> bool {
        self.core.ledger.cancel(&name.into())
    }

    pub fn cancel_all_tasks(&self) -> usize {
        self.core.ledger.cancel_all()
    }

    pub fn is_task_running(&self, name: impl Into<TaskName>) -> bool {
        self.core.ledger.is_running(&name.into())
    }

    /// Load `field` asynchronously.
    ///
    /// Once the load task has started, the field enters `Loading`, keeping
    /// any content it had. If the task cannot start the field is left as it
    /// was. The load runs as a task named after the field, so a second load
    /// replaces an in-flight one and only the latest outcome is ever stored.
    pub fn load<T, F, Fut>(
        &self,
        field: &Field<M::State, Resource<T>>,
        work: F,
    ) -> Result<TaskId>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext<M>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, ResourceError>> + Send + 'static,
    {
        let name = TaskName::from(format!("resource:{}", field.path()));
        let target = field.clone();

        // The task rejoins this domain before finishing, so it cannot store
        // an outcome before `begin_load` below has run.
        let id = self.run_task(name, true, move |task| async move {
            let outcome = work(task.clone()).await;
            if let Err(err) = task.apply(|ctx| ctx.modify(&target, |slot| slot.finish(outcome))) {
                tracing::trace!(task = %task.name(), %err, "load outcome discarded");
            }
        })?;
        self.modify(field, Resource::begin_load);
        Ok(id)
    }

    pub fn dependency<K: DependencyKey>(&self) -> K::Value {
        self.core.env.read().get::<K>()
    }

    /// Override `K` for this store and for children created from now on.
    pub fn override_dependency<K: DependencyKey>(&self, value: K::Value) {
        self.core.env.write().set::<K>(value);
    }

    /// Call into the nearest ancestor whose model is `P`.
    ///
    /// Returns `None` if there is no such ancestor or the call failed.
    pub fn parent<P: Model, R>(&self, f: impl FnOnce(&Context<'_, P>) -> R) -> Option<R> {
        let parent = self.core.graph.find_ancestor::<P>(self.core.id)?;
        parent.transaction(None, f).ok()
    }

    /// Call into a direct child whose model is `C`.
    pub fn child<C: Model, R>(&self, f: impl FnOnce(&Context<'_, C>) -> R) -> Option<R> {
        let child = self.core.graph.find_child::<C>(self.core.id, None)?;
        child.transaction(None, f).ok()
    }

    /// Call into the direct child with model `C` and explicit `identity`.
    pub fn child_keyed<C: Model, R>(
        &self,
        identity: impl Into<Identity>,
        f: impl FnOnce(&Context<'_, C>) -> R,
    ) -> Option<R> {
        let identity = identity.into();
        let child = self.core.graph.find_child::<C>(self.core.id, Some(&identity))?;
        child.transaction(None, f).ok()
    }

    /// Call into another child of this store's parent whose model is `S`.
    pub fn sibling<S: Model, R>(&self, f: impl FnOnce(&Context<'_, S>) -> R) -> Option<R> {
        let sibling = self.core.graph.find_sibling::<S>(self.core.id)?;
        sibling.transaction(None, f).ok()
    }

    /// Resolve the child behind `connection`, creating it on first use.
    pub fn connect<C: Model>(&self, connection: &Connection<M, C>) -> Result<Store<C>> {
        connection.resolve(self.core, None).map(Store::from_core)
    }

    /// Resolve the child of `connection` cached under `identity`.
    pub fn connect_keyed<C: Model>(
        &self,
        connection: &Connection<M, C>,
        identity: impl Into<Identity>,
    ) -> Result<Store<C>> {
        connection
            .resolve(self.core, Some(identity.into()))
            .map(Store::from_core)
    }

    /// Destroy the child behind `connection`. Returns false if there was none.
    pub fn disconnect<C: Model>(&self, connection: &Connection<M, C>) -> bool {
        self.core.detach_child(&EdgeKey::Slot(connection.name()))
    }

    /// Destroy the keyed child cached under `identity`.
    pub fn disconnect_keyed(&self, identity: impl Into<Identity>) -> bool {
        self.core.detach_child(&EdgeKey::Keyed(identity.into()))
    }
}

impl<M: Model> fmt::Debug for Context<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.core.id)
            .field("model", &M::name())
            .field("task", &self.scope.map(|scope| &scope.name))
            .finish()
    }
}
