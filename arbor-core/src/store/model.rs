//! The model trait.

use crate::descriptor::ModelDescriptor;
use crate::reactive::FieldPath;

use super::Context;

/// A unit of state and behaviour that lives in one [`Store`](super::Store).
///
/// A model never owns its state: the store does. Handlers get a
/// [`Context`] through which they read and write state, start tasks, emit
/// outputs and reach other stores. Handlers are synchronous; anything that
/// needs to wait is started as a task.
///
/// Use [`std::convert::Infallible`] for message types the model never
/// receives or emits.
///
/// ```rust,ignore
/// struct Counter;
///
/// impl Model for Counter {
///     type State = CounterState;
///     type Action = CounterAction;
///     type Input = Infallible;
///     type Output = Infallible;
///
///     fn handle(&self, ctx: &Context<'_, Self>, action: CounterAction) {
///         match action {
///             CounterAction::Increment => {
///                 ctx.update(&field!(CounterState => count), |n| *n += 1);
///             }
///         }
///     }
/// }
/// ```
pub trait Model: Send + Sync + Sized + 'static {
    type State: Clone + Send + Sync + 'static;
    /// Messages sent in from outside the store.
    type Action: Send + 'static;
    /// Messages delivered by the parent, typically mapped from a child's output.
    type Input: Send + 'static;
    /// Messages emitted to whoever owns the store.
    type Output: Send + 'static;

    fn handle(&self, ctx: &Context<'_, Self>, action: Self::Action);

    fn handle_input(&self, ctx: &Context<'_, Self>, input: Self::Input) {
        let _ = (ctx, input);
    }

    /// Called when the store becomes visible. A good place to start work.
    fn appear(&self, ctx: &Context<'_, Self>, first: bool) {
        let _ = (ctx, first);
    }

    /// Called when the store stops being visible, before its tasks are
    /// cancelled.
    fn disappear(&self, ctx: &Context<'_, Self>) {
        let _ = ctx;
    }

    /// Called after a binding write changed the field at `path`.
    fn binding(&self, ctx: &Context<'_, Self>, path: &FieldPath) {
        let _ = (ctx, path);
    }

    /// Short name used in logs and errors.
    fn name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Structural summary for documentation tools.
    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new(Self::name())
    }
}
