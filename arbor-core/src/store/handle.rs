//! Public store handles.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;

use super::inner::{Placement, StoreCore};
use super::{Context, Model};
use crate::config::RuntimeConfig;
use crate::deps::{DependencyEnvironment, DependencyKey};
use crate::descriptor::ModelDescriptor;
use crate::error::Result;
use crate::graph::{AnyNode, Connection, ConnectionGraph, Identity, StoreId};
use crate::reactive::{Field, FieldPath, ObservationContext, SubscriberId};
use crate::task::TaskName;

/// A handle to a live store.
///
/// Handles are cheap to clone. The handle returned by [`Store::new`] is the
/// root's only owner: once every clone of it is dropped the whole tree is
/// released, and every running task stops at its next suspension point.
///
/// Calls on a destroyed store are no-ops that return
/// [`RuntimeError::Stale`](crate::RuntimeError::Stale).
pub struct Store<M: Model> {
    core: Arc<StoreCore<M>>,
}

impl<M: Model> Store<M> {
    /// Create a root store with the default configuration.
    pub fn new(model: M, state: M::State) -> Self {
        Self::builder(model, state).build()
    }

    pub fn builder(model: M, state: M::State) -> StoreBuilder<M> {
        StoreBuilder {
            model,
            state,
            config: RuntimeConfig::default(),
            runtime: None,
            env: DependencyEnvironment::new(),
        }
    }

    pub(crate) fn from_core(core: Arc<StoreCore<M>>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> StoreId {
        self.core.id
    }

    /// An untracked snapshot of the state.
    pub fn state(&self) -> M::State {
        self.core.state.lock().clone()
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

    /// Dispatch an action. Outputs it emits have been routed by the time
    /// this returns.
    pub fn send(&self, action: M::Action) -> Result<()> {
        self.core.dispatch(None, action)
    }

    pub fn send_input(&self, input: M::Input) -> Result<()> {
        self.core.dispatch_input(None, input)
    }

    /// Write a field from a UI binding, then run the model's binding hook
    /// if the value changed.
    pub fn binding<V: PartialEq + 'static>(
        &self,
        field: &Field<M::State, V>,
        value: V,
    ) -> Result<bool> {
        self.core.transaction(None, |ctx| {
            let changed = ctx.set(field, value);
            if changed {
                ctx.model().binding(ctx, field.path());
            }
            changed
        })
    }

    pub fn appear(&self, first: bool) -> Result<()> {
        self.core.appear(first)
    }

    /// Run the disappear hook and cancel every task of this store.
    pub fn disappear(&self) -> Result<()> {
        self.core.disappear()
    }

    /// Destroy this store and everything below it, even while other
    /// handles remain.
    pub fn destroy(&self) {
        self.core.teardown();
    }

    /// Run `f` inside the store's serialization domain.
    pub fn with_context<R>(&self, f: impl FnOnce(&Context<'_, M>) -> R) -> Result<R> {
        self.core.transaction(None, f)
    }

    pub fn connect<C: Model>(&self, connection: &Connection<M, C>) -> Result<Store<C>> {
        self.with_context(|ctx| ctx.connect(connection))?
    }

    pub fn connect_keyed<C: Model>(
        &self,
        connection: &Connection<M, C>,
        identity: impl Into<Identity>,
    ) -> Result<Store<C>> {
        let identity = identity.into();
        self.with_context(|ctx| ctx.connect_keyed(connection, identity))?
    }

    pub fn dependency<K: DependencyKey>(&self) -> K::Value {
        self.core.env.read().get::<K>()
    }

    /// Override `K` for this store and for children created from now on.
    pub fn override_dependency<K: DependencyKey>(&self, value: K::Value) {
        self.core.env.write().set::<K>(value);
    }

    pub fn dependencies(&self) -> DependencyEnvironment {
        self.core.env.read().clone()
    }

    /// Call `listener` with the path of every change to this store.
    pub fn on_change(&self, listener: impl Fn(&FieldPath) + Send + Sync + 'static) -> SubscriberId {
        self.core.registrar.add_listener(Arc::new(listener))
    }

    pub fn remove_change_listener(&self, id: SubscriberId) -> bool {
        self.core.registrar.remove_listener(id)
    }

    /// Call `listener` with every output this store emits.
    pub fn on_output(&self, listener: impl Fn(&M::Output) + Send + Sync + 'static) -> SubscriberId {
        self.core.add_output_listener(Arc::new(listener))
    }

    pub fn remove_output_listener(&self, id: SubscriberId) -> bool {
        self.core.remove_output_listener(id)
    }

    pub fn running_tasks(&self) -> Vec<TaskName> {
        self.core.ledger.names()
    }

    /// Wait until every task this store started has finished or stopped.
    pub async fn quiesce(&self) {
        self.core.ledger.quiesce().await
    }

    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }

    pub fn downgrade(&self) -> WeakStore<M> {
        WeakStore {
            core: Arc::downgrade(&self.core),
        }
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.core.graph
    }

    pub fn descriptor() -> ModelDescriptor {
        M::descriptor()
    }
}

impl<M: Model> Clone for Store<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<M: Model> PartialEq for Store<M> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<M: Model> Eq for Store<M> {}

impl<M: Model> fmt::Debug for Store<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.core.id)
            .field("model", &M::name())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A non-owning store handle.
pub struct WeakStore<M: Model> {
    core: Weak<StoreCore<M>>,
}

impl<M: Model> WeakStore<M> {
    pub fn upgrade(&self) -> Option<Store<M>> {
        self.core.upgrade().map(Store::from_core)
    }

    /// True once the store's memory has been released.
    pub fn is_released(&self) -> bool {
        self.core.strong_count() == 0
    }
}

impl<M: Model> Clone for WeakStore<M> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<M: Model> fmt::Debug for WeakStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("model", &M::name())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Builds a root store.
pub struct StoreBuilder<M: Model> {
    model: M,
    state: M::State,
    config: RuntimeConfig,
    runtime: Option<Handle>,
    env: DependencyEnvironment,
}

impl<M: Model> StoreBuilder<M> {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Run this tree's tasks on `runtime` instead of the ambient one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn dependency<K: DependencyKey>(mut self, value: K::Value) -> Self {
        self.env.set::<K>(value);
        self
    }

    pub fn build(self) -> Store<M> {
        let placement = Placement {
            env: self.env,
            graph: ConnectionGraph::new(),
            config: Arc::new(self.config),
            domain: Arc::new(ReentrantMutex::new(())),
            runtime: self.runtime,
            parent: None,
            identity: None,
            route: None,
            upstream: None,
        };
        Store::from_core(StoreCore::new(self.model, self.state, placement))
    }
}
