//! Connections
//!
//! A [`Connection`] declares how a parent store reaches a child: how the
//! child is built, where its state comes from, and what happens to its
//! outputs. Resolving a connection creates the child on first use and
//! returns the cached one afterward.
//!
//! # State derivation
//!
//! - [`Connection::fixed`]: the child starts from a fixed value and is not
//!   linked to the parent's state.
//! - [`Connection::scoped`]: the child's state is a field of the parent's.
//!   Parent writes to that field are mirrored into the child, and child
//!   writes are written back into the field.
//! - [`Connection::presented`]: like `scoped`, over an `Option` field. The
//!   child can only be resolved while the field holds a value and is
//!   destroyed when it is cleared.
//!
//! # Outputs
//!
//! Child outputs are ignored by default. [`Connection::map_output`] turns
//! each one into a parent input; [`Connection::on_output`] handles it inline
//! with access to both stores. Either runs once per output, before the
//! child's `send` returns.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use super::node::{AnyNode, EdgeKey, Identity};
use crate::deps::{DependencyEnvironment, DependencyKey};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{Result, RuntimeError};
use crate::reactive::{Field, FieldPath};
use crate::store::inner::{
    ChildEdge, EdgeSync, OutputRoute, Placement, StoreCore, SyncOutcome, Upstream,
};
use crate::store::{Context, Model, Store};

type EnvOverride = Arc<dyn Fn(&mut DependencyEnvironment) + Send + Sync>;
type MapOutput<P, C> = Arc<dyn Fn(<C as Model>::Output) -> <P as Model>::Input + Send + Sync>;
type OutputHandler<P, C> =
    Arc<dyn Fn(&Context<'_, P>, &Store<C>, <C as Model>::Output) + Send + Sync>;

enum Derivation<PS, CS> {
    Fixed(CS),
    Scoped(Field<PS, CS>),
    Presented(Field<PS, Option<CS>>),
}

enum OutputPolicy<P: Model, C: Model> {
    Ignore,
    Input(MapOutput<P, C>),
    Handler(OutputHandler<P, C>),
}

/// A declared edge from a parent model `P` to a child model `C`.
///
/// ```rust,ignore
/// let editor = Connection::presented("editor", || Editor, field!(ListState => editing))
///     .map_output(|EditorOutput::Saved(item)| ListInput::Saved(item));
///
/// ctx.connect(&editor)?.send(EditorAction::Save)?;
/// ```
pub struct Connection<P: Model, C: Model> {
    name: &'static str,
    make: Arc<dyn Fn() -> C + Send + Sync>,
    state: Derivation<P::State, C::State>,
    output: OutputPolicy<P, C>,
    overrides: Vec<EnvOverride>,
}

impl<P: Model, C: Model> Connection<P, C> {
    fn with_state(
        name: &'static str,
        make: impl Fn() -> C + Send + Sync + 'static,
        state: Derivation<P::State, C::State>,
    ) -> Self {
        Self {
            name,
            make: Arc::new(make),
            state,
            output: OutputPolicy::Ignore,
            overrides: Vec::new(),
        }
    }

    /// A child that starts from `initial`.
    pub fn fixed(
        name: &'static str,
        make: impl Fn() -> C + Send + Sync + 'static,
        initial: C::State,
    ) -> Self {
        Self::with_state(name, make, Derivation::Fixed(initial))
    }

    /// A child whose state is the parent field `field`.
    pub fn scoped(
        name: &'static str,
        make: impl Fn() -> C + Send + Sync + 'static,
        field: Field<P::State, C::State>,
    ) -> Self {
        Self::with_state(name, make, Derivation::Scoped(field))
    }

    /// A child that exists while the optional parent field `field` is set.
    pub fn presented(
        name: &'static str,
        make: impl Fn() -> C + Send + Sync + 'static,
        field: Field<P::State, Option<C::State>>,
    ) -> Self {
        Self::with_state(name, make, Derivation::Presented(field))
    }

    /// Deliver each child output to the parent as an input.
    pub fn map_output(
        mut self,
        map: impl Fn(C::Output) -> P::Input + Send + Sync + 'static,
    ) -> Self {
        self.output = OutputPolicy::Input(Arc::new(map));
        self
    }

    /// Handle each child output inside the parent's domain.
    pub fn on_output(
        mut self,
        handler: impl Fn(&Context<'_, P>, &Store<C>, C::Output) + Send + Sync + 'static,
    ) -> Self {
        self.output = OutputPolicy::Handler(Arc::new(handler));
        self
    }

    pub fn ignore_output(mut self) -> Self {
        self.output = OutputPolicy::Ignore;
        self
    }

    /// Override `K` for children created through this connection.
    pub fn dependency<K: DependencyKey>(mut self, value: K::Value) -> Self {
        self.overrides
            .push(Arc::new(move |env: &mut DependencyEnvironment| env.set::<K>(value.clone())));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn describe(&self) -> ConnectionDescriptor {
        let kind = match self.state {
            Derivation::Fixed(_) => "fixed",
            Derivation::Scoped(_) => "scoped",
            Derivation::Presented(_) => "presented",
        };
        ConnectionDescriptor {
            name: self.name.to_string(),
            model: C::name().to_string(),
            kind: kind.to_string(),
        }
    }

    /// Find or create the child of `parent` behind this connection.
    pub(crate) fn resolve(
        &self,
        parent: &Arc<StoreCore<P>>,
        identity: Option<Identity>,
    ) -> Result<Arc<StoreCore<C>>> {
        if !parent.is_alive() {
            return Err(parent.stale());
        }
        let key = match identity {
            Some(identity) => EdgeKey::Keyed(identity),
            None => EdgeKey::Slot(self.name),
        };

        let existing = parent
            .children
            .lock()
            .get(&key)
            .map(|edge| (edge.connection, Arc::clone(&edge.node)));
        if let Some((connection, node)) = existing.filter(|(_, node)| node.is_alive()) {
            if connection == self.name && node.model_type() == TypeId::of::<C>() {
                if let Ok(child) = node.as_any().downcast::<StoreCore<C>>() {
                    return Ok(child);
                }
            } else if let EdgeKey::Keyed(identity) = &key {
                tracing::error!(
                    store = %parent.id,
                    %identity,
                    existing = connection,
                    requested = self.name,
                    "identity collision"
                );
                return Err(RuntimeError::IdentityCollision {
                    parent: parent.id,
                    identity: identity.clone(),
                    existing: connection,
                    requested: self.name,
                });
            }
        }

        let initial = self.initial_state(parent)?;
        let mut env = parent.env.read().clone();
        for apply in &self.overrides {
            apply(&mut env);
        }
        let placement = Placement {
            env,
            graph: parent.graph.clone(),
            config: Arc::clone(&parent.config),
            domain: Arc::clone(&parent.domain),
            runtime: parent.ledger.runtime().cloned(),
            parent: Some(parent.id),
            identity: key.identity().cloned(),
            route: self.route(parent),
            upstream: self.upstream(parent, &key),
        };
        let child = StoreCore::new((self.make)(), initial, placement);

        tracing::debug!(
            store = %parent.id,
            child = %child.id,
            connection = self.name,
            identity = ?key.identity(),
            "child resolved"
        );
        let node: Arc<dyn AnyNode> = child.clone();
        let edge = ChildEdge {
            connection: self.name,
            node,
            sync: self.sync(&child),
        };
        let replaced = parent.children.lock().insert(key, edge);
        if let Some(replaced) = replaced {
            replaced.node.destroy();
        }
        Ok(child)
    }

    fn initial_state(&self, parent: &StoreCore<P>) -> Result<C::State> {
        match &self.state {
            Derivation::Fixed(initial) => Ok(initial.clone()),
            Derivation::Scoped(field) => Ok(field.get(&parent.state.lock()).clone()),
            Derivation::Presented(field) => field
                .get(&parent.state.lock())
                .clone()
                .ok_or(RuntimeError::NotPresented {
                    connection: self.name,
                }),
        }
    }

    fn route(&self, parent: &Arc<StoreCore<P>>) -> Option<OutputRoute<C>> {
        let parent = Arc::downgrade(parent);
        match &self.output {
            OutputPolicy::Ignore => None,
            OutputPolicy::Input(map) => {
                let map = Arc::clone(map);
                Some(Box::new(move |_: &Arc<StoreCore<C>>, output: C::Output| {
                    let Some(parent) = parent.upgrade() else {
                        return;
                    };
                    if let Err(err) = parent.dispatch_input(None, map(output)) {
                        tracing::debug!(store = %parent.id, %err, "mapped output not delivered");
                    }
                }))
            }
            OutputPolicy::Handler(handler) => {
                let handler = Arc::clone(handler);
                Some(Box::new(move |child: &Arc<StoreCore<C>>, output: C::Output| {
                    let Some(parent) = parent.upgrade() else {
                        return;
                    };
                    let child = Store::from_core(Arc::clone(child));
                    if let Err(err) = parent.transaction(None, |ctx| handler(ctx, &child, output)) {
                        tracing::debug!(store = %parent.id, %err, "output handler failed");
                    }
                }))
            }
        }
    }

    fn upstream(&self, parent: &Arc<StoreCore<P>>, key: &EdgeKey) -> Option<Upstream<C::State>> {
        let parent = Arc::downgrade(parent);
        let origin = key.clone();
        match &self.state {
            Derivation::Fixed(_) => None,
            Derivation::Scoped(field) => {
                let field = field.clone();
                Some(Box::new(move |state: &C::State, changed: &FieldPath| {
                    if let Some(parent) = parent.upgrade() {
                        parent.write_back(&origin, field.path().join(changed), |parent_state| {
                            *field.get_mut(parent_state) = state.clone();
                        });
                    }
                }))
            }
            Derivation::Presented(field) => {
                let field = field.clone();
                Some(Box::new(move |state: &C::State, changed: &FieldPath| {
                    if let Some(parent) = parent.upgrade() {
                        parent.write_back(&origin, field.path().join(changed), |parent_state| {
                            if let Some(slot) = field.get_mut(parent_state) {
                                *slot = state.clone();
                            }
                        });
                    }
                }))
            }
        }
    }

    fn sync(&self, child: &Arc<StoreCore<C>>) -> Option<EdgeSync<P::State>> {
        let child = Arc::downgrade(child);
        match &self.state {
            Derivation::Fixed(_) => None,
            Derivation::Scoped(field) => {
                let field = field.clone();
                Some(Arc::new(move |state: &P::State, changed: &FieldPath| {
                    let Some(relative) = relative_change(field.path(), changed) else {
                        return SyncOutcome::Unaffected;
                    };
                    match child.upgrade() {
                        Some(child) => {
                            child.mirror(field.get(state).clone(), &relative);
                            SyncOutcome::Mirrored
                        }
                        None => SyncOutcome::Unaffected,
                    }
                }))
            }
            Derivation::Presented(field) => {
                let field = field.clone();
                Some(Arc::new(move |state: &P::State, changed: &FieldPath| {
                    let Some(relative) = relative_change(field.path(), changed) else {
                        return SyncOutcome::Unaffected;
                    };
                    let Some(value) = field.get(state) else {
                        return SyncOutcome::Detach;
                    };
                    match child.upgrade() {
                        Some(child) => {
                            child.mirror(value.clone(), &relative);
                            SyncOutcome::Mirrored
                        }
                        None => SyncOutcome::Unaffected,
                    }
                }))
            }
        }
    }
}

/// The part of a child's state touched by a parent write at `changed`, for
/// a child scoped to `lens`.
fn relative_change(lens: &FieldPath, changed: &FieldPath) -> Option<FieldPath> {
    match changed.strip_prefix(lens) {
        Some(rest) => Some(rest),
        None if changed.is_prefix_of(lens) => Some(FieldPath::root()),
        None => None,
    }
}

impl<P: Model, C: Model> Clone for Connection<P, C> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            Derivation::Fixed(initial) => Derivation::Fixed(initial.clone()),
            Derivation::Scoped(field) => Derivation::Scoped(field.clone()),
            Derivation::Presented(field) => Derivation::Presented(field.clone()),
        };
        let output = match &self.output {
            OutputPolicy::Ignore => OutputPolicy::Ignore,
            OutputPolicy::Input(map) => OutputPolicy::Input(Arc::clone(map)),
            OutputPolicy::Handler(handler) => OutputPolicy::Handler(Arc::clone(handler)),
        };
        Self {
            name: self.name,
            make: Arc::clone(&self.make),
            state,
            output,
            overrides: self.overrides.clone(),
        }
    }
}

impl<P: Model, C: Model> fmt::Debug for Connection<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("parent", &P::name())
            .field("child", &C::name())
            .finish()
    }
}
