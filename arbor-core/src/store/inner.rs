//! Store internals shared by [`Store`](super::Store), [`Context`] and
//! [`TaskContext`](crate::task::TaskContext).
//!
//! # Ownership
//!
//! A parent owns its children through strong edges in `children`. Every
//! other link (graph entries, output routes, write-back closures, edge syncs
//! and running tasks) holds a `Weak`, so dropping the root releases the
//! whole tree.
//!
//! # Propagation
//!
//! A write notifies the store's registrar, mirrors the new value into every
//! child whose lens overlaps the written path, and writes the store's state
//! back into its parent when it is scoped to a parent field. A write-back
//! skips the edge it came from, and a mirror never travels upward, so a
//! change crosses each edge at most once.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::runtime::Handle;

use super::{Context, Model};
use crate::config::RuntimeConfig;
use crate::deps::DependencyEnvironment;
use crate::error::{Result, RuntimeError};
use crate::graph::{AnyNode, ConnectionGraph, EdgeKey, Identity, StoreId};
use crate::reactive::{ChangeRegistrar, FieldPath, SubscriberId};
use crate::task::{TaskLedger, TaskScope};

/// The serialization domain shared by every store in one tree.
pub(crate) type Domain = Arc<ReentrantMutex<()>>;

/// Delivers one output of a child store to its parent.
pub(crate) type OutputRoute<M> =
    Box<dyn Fn(&Arc<StoreCore<M>>, <M as Model>::Output) + Send + Sync>;

/// Writes a child's state back into the parent field it is scoped to.
pub(crate) type Upstream<S> = Box<dyn Fn(&S, &FieldPath) + Send + Sync>;

/// Mirrors a changed parent state into one child.
pub(crate) type EdgeSync<S> = Arc<dyn Fn(&S, &FieldPath) -> SyncOutcome + Send + Sync>;

pub(crate) type OutputListener<O> = Arc<dyn Fn(&O) + Send + Sync>;

pub(crate) enum SyncOutcome {
    Unaffected,
    Mirrored,
    /// The presented field went empty; the child must be destroyed.
    Detach,
}

/// A parent's strong edge to one child.
pub(crate) struct ChildEdge<S> {
    pub(crate) connection: &'static str,
    pub(crate) node: Arc<dyn AnyNode>,
    pub(crate) sync: Option<EdgeSync<S>>,
}

/// Where a new store sits and what it inherits.
pub(crate) struct Placement<M: Model> {
    pub(crate) env: DependencyEnvironment,
    pub(crate) graph: ConnectionGraph,
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) domain: Domain,
    pub(crate) runtime: Option<Handle>,
    pub(crate) parent: Option<StoreId>,
    pub(crate) identity: Option<Identity>,
    pub(crate) route: Option<OutputRoute<M>>,
    pub(crate) upstream: Option<Upstream<M::State>>,
}

/// Nesting level of transactions on one store.
struct Depth<'a>(&'a AtomicUsize);

impl<'a> Depth<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self(depth)
    }

    /// Leave this level. True when it was the outermost one.
    fn exit(self) -> bool {
        let depth = self.0;
        drop(self);
        depth.load(Ordering::Acquire) == 0
    }
}

impl Drop for Depth<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct StoreCore<M: Model> {
    pub(crate) id: StoreId,
    pub(crate) model: M,
    pub(crate) state: Mutex<M::State>,
    pub(crate) registrar: ChangeRegistrar,
    pub(crate) ledger: TaskLedger,
    pub(crate) env: RwLock<DependencyEnvironment>,
    pub(crate) graph: ConnectionGraph,
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) domain: Domain,
    pub(crate) children: Mutex<IndexMap<EdgeKey, ChildEdge<M::State>>>,
    depth: AtomicUsize,
    alive: AtomicBool,
    outputs: Mutex<VecDeque<M::Output>>,
    output_listeners: Mutex<Vec<(SubscriberId, OutputListener<M::Output>)>>,
    route: Option<OutputRoute<M>>,
    upstream: Option<Upstream<M::State>>,
}

impl<M: Model> StoreCore<M> {
    pub(crate) fn new(model: M, state: M::State, placement: Placement<M>) -> Arc<Self> {
        let Placement {
            env,
            graph,
            config,
            domain,
            runtime,
            parent,
            identity,
            route,
            upstream,
        } = placement;
        let id = StoreId::new();

        let core = Arc::new(Self {
            id,
            model,
            state: Mutex::new(state),
            registrar: ChangeRegistrar::new(),
            ledger: TaskLedger::new(id, runtime),
            env: RwLock::new(env),
            graph,
            config,
            domain,
            children: Mutex::new(IndexMap::new()),
            depth: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            outputs: Mutex::new(VecDeque::new()),
            output_listeners: Mutex::new(Vec::new()),
            route,
            upstream,
        });

        let node: Arc<dyn AnyNode> = core.clone();
        core.graph.register(&node, parent, identity);
        tracing::debug!(
            tree = core.config.label(),
            store = %id,
            model = M::name(),
            parent = ?parent,
            "store created"
        );
        core
    }

    /// Report use of a destroyed store.
    pub(crate) fn stale(&self) -> RuntimeError {
        if self.config.warn_on_stale {
            tracing::warn!(store = %self.id, model = M::name(), "destroyed store was used");
        }
        RuntimeError::Stale {
            id: self.id,
            model: M::name(),
        }
    }

    /// Run `f` inside the serialization domain.
    ///
    /// Outputs queued while it runs are routed once the outermost
    /// transaction on this store has finished.
    pub(crate) fn transaction<R>(
        self: &Arc<Self>,
        scope: Option<&TaskScope>,
        f: impl FnOnce(&Context<'_, M>) -> R,
    ) -> Result<R> {
        let (outcome, outermost) = {
            let _domain = self.domain.lock();
            if !self.is_alive() {
                return Err(self.stale());
            }
            if let Some(scope) = scope.filter(|scope| scope.token.is_cancelled()) {
                return Err(RuntimeError::TaskCancelled {
                    task: scope.name.clone(),
                });
            }

            let depth = Depth::enter(&self.depth);
            let ctx = Context::new(self, scope);
            let outcome = if self.config.catch_panics {
                panic::catch_unwind(AssertUnwindSafe(|| f(&ctx)))
            } else {
                Ok(f(&ctx))
            };
            (outcome, depth.exit())
        };

        if outermost {
            self.flush_outputs();
        }

        outcome.map_err(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(store = %self.id, model = M::name(), %message, "handler panicked");
            RuntimeError::HandlerPanicked {
                model: M::name(),
                message,
            }
        })
    }

    pub(crate) fn dispatch(
        self: &Arc<Self>,
        scope: Option<&TaskScope>,
        action: M::Action,
    ) -> Result<()> {
        self.transaction(scope, |ctx| self.model.handle(ctx, action))
    }

    pub(crate) fn dispatch_input(
        self: &Arc<Self>,
        scope: Option<&TaskScope>,
        input: M::Input,
    ) -> Result<()> {
        self.transaction(scope, |ctx| self.model.handle_input(ctx, input))
    }

    pub(crate) fn appear(self: &Arc<Self>, first: bool) -> Result<()> {
        tracing::debug!(store = %self.id, model = M::name(), first, "store appeared");
        self.transaction(None, |ctx| self.model.appear(ctx, first))
    }

    /// Run the disappear hook, then cancel every task.
    pub(crate) fn disappear(self: &Arc<Self>) -> Result<()> {
        let _domain = self.domain.lock();
        if !self.is_alive() {
            return Err(self.stale());
        }
        let hook = self.transaction(None, |ctx| self.model.disappear(ctx));
        let cancelled = self.ledger.cancel_all();
        tracing::debug!(store = %self.id, model = M::name(), cancelled, "store disappeared");
        hook
    }

    /// Destroy this store and its subtree, running the disappear hook first.
    pub(crate) fn teardown(self: &Arc<Self>) {
        let _domain = self.domain.lock();
        if !self.is_alive() {
            return;
        }
        // A panicking hook has already been logged.
        let _ = self.disappear();
        self.alive.store(false, Ordering::Release);
        self.ledger.cancel_all();

        let children: Vec<ChildEdge<M::State>> =
            self.children.lock().drain(..).map(|(_, edge)| edge).collect();
        for edge in children {
            edge.node.destroy();
        }

        // A store destroyed through its own handle is still held by its
        // parent's edge.
        let parent = self.graph.parent_of(self.id).and_then(|id| self.graph.node(id));
        if let Some(parent) = parent {
            parent.forget_child(self.id);
        }

        self.registrar.clear();
        self.graph.unregister(self.id);
        tracing::debug!(store = %self.id, model = M::name(), "store destroyed");
    }

    /// Apply a write. `apply` returns whether the value changed; only a
    /// change is propagated.
    pub(crate) fn write(
        &self,
        path: &FieldPath,
        apply: impl FnOnce(&mut M::State) -> bool,
    ) -> bool {
        if !self.is_alive() {
            self.stale();
            return false;
        }
        let wants_snapshot = self.upstream.is_some() || !self.children.lock().is_empty();
        let snapshot = {
            let mut state = self.state.lock();
            if !apply(&mut *state) {
                return false;
            }
            wants_snapshot.then(|| (*state).clone())
        };

        tracing::trace!(store = %self.id, %path, "state changed");
        self.propagate(path, snapshot.as_ref(), None);
        true
    }

    /// Apply a change arriving from the child behind `origin`.
    pub(crate) fn write_back(
        &self,
        origin: &EdgeKey,
        path: FieldPath,
        apply: impl FnOnce(&mut M::State),
    ) {
        if !self.is_alive() {
            return;
        }
        let snapshot = {
            let mut state = self.state.lock();
            apply(&mut *state);
            (*state).clone()
        };
        tracing::trace!(store = %self.id, %path, "child change written back");
        self.propagate(&path, Some(&snapshot), Some(origin));
    }

    /// Replace the state with a value mirrored from the parent.
    pub(crate) fn mirror(&self, value: M::State, changed: &FieldPath) {
        if !self.is_alive() {
            return;
        }
        let wants_snapshot = !self.children.lock().is_empty();
        let snapshot = {
            let mut state = self.state.lock();
            *state = value;
            wants_snapshot.then(|| (*state).clone())
        };
        self.registrar.notify(changed);
        if let Some(state) = snapshot {
            self.sync_children(&state, changed, None);
        }
    }

    fn propagate(&self, path: &FieldPath, snapshot: Option<&M::State>, origin: Option<&EdgeKey>) {
        self.registrar.notify(path);
        let Some(state) = snapshot else {
            return;
        };
        self.sync_children(state, path, origin);
        if let Some(upstream) = &self.upstream {
            upstream(state, path);
        }
    }

    fn sync_children(&self, state: &M::State, changed: &FieldPath, origin: Option<&EdgeKey>) {
        let syncs: Vec<(EdgeKey, EdgeSync<M::State>)> = self
            .children
            .lock()
            .iter()
            .filter(|(key, _)| origin != Some(*key))
            .filter_map(|(key, edge)| {
                edge.sync
                    .as_ref()
                    .map(|sync| (key.clone(), Arc::clone(sync)))
            })
            .collect();

        let mut mirrored = 0;
        let mut detached = Vec::new();
        for (key, sync) in syncs {
            match sync(state, changed) {
                SyncOutcome::Unaffected => {}
                SyncOutcome::Mirrored => mirrored += 1,
                SyncOutcome::Detach => detached.push(key),
            }
        }
        if mirrored > 0 {
            tracing::trace!(store = %self.id, path = %changed, mirrored, "mirrored into children");
        }
        for key in detached {
            self.detach_child(&key);
        }
    }

    /// Remove and destroy the child behind `key`.
    pub(crate) fn detach_child(&self, key: &EdgeKey) -> bool {
        let edge = self.children.lock().shift_remove(key);
        let Some(edge) = edge else {
            return false;
        };
        tracing::debug!(
            store = %self.id,
            child = %edge.node.id(),
            model = edge.node.model_name(),
            connection = edge.connection,
            "child detached"
        );
        edge.node.destroy();
        true
    }

    /// Remove the edge to `child` without destroying it.
    fn unlink_child(&self, child: StoreId) -> bool {
        let edge = {
            let mut children = self.children.lock();
            let key = children
                .iter()
                .find(|(_, edge)| edge.node.id() == child)
                .map(|(key, _)| key.clone());
            key.and_then(|key| children.shift_remove(&key))
        };
        edge.is_some()
    }

    pub(crate) fn emit(&self, output: M::Output) {
        self.outputs.lock().push_back(output);
    }

    fn next_output(&self) -> Option<M::Output> {
        self.outputs.lock().pop_front()
    }

    fn flush_outputs(self: &Arc<Self>) {
        while let Some(output) = self.next_output() {
            let listeners: Vec<OutputListener<M::Output>> = self
                .output_listeners
                .lock()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in &listeners {
                self.deliver("output listener", || listener(&output));
            }
            match &self.route {
                Some(route) => self.deliver("output route", || route(self, output)),
                None => tracing::trace!(store = %self.id, "output surfaced at root"),
            }
        }
    }

    /// Run an output callback, containing a panic the same way handler
    /// panics are contained.
    fn deliver(&self, what: &'static str, f: impl FnOnce()) {
        if !self.config.catch_panics {
            f();
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let message = panic_message(payload.as_ref());
            tracing::error!(store = %self.id, model = M::name(), %message, "{what} panicked");
        }
    }

    pub(crate) fn add_output_listener(&self, listener: OutputListener<M::Output>) -> SubscriberId {
        let id = SubscriberId::new();
        self.output_listeners.lock().push((id, listener));
        id
    }

    pub(crate) fn remove_output_listener(&self, id: SubscriberId) -> bool {
        let mut listeners = self.output_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

impl<M: Model> AnyNode for StoreCore<M> {
    fn id(&self) -> StoreId {
        self.id
    }

    fn model_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn model_name(&self) -> &'static str {
        M::name()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn destroy(self: Arc<Self>) {
        self.teardown();
    }

    fn forget_child(&self, child: StoreId) -> bool {
        self.unlink_child(child)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<M: Model> Drop for StoreCore<M> {
    fn drop(&mut self) {
        self.ledger.cancel_all();
        self.graph.unregister(self.id);
        tracing::debug!(store = %self.id, model = M::name(), "store released");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
