//! Observation Context
//!
//! The observation context tracks which subscriber is currently reading
//! state. When a store field is read through a tracked accessor, the store
//! asks the context whether anyone is observing and, if so, records the read
//! with the store's change registrar.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering an observation pushes its subscriber;
//! dropping the guard pops it. Nested observations record into the innermost
//! entry only, and an untracked scope pushes an entry with no subscriber so
//! reads inside it are ignored.

use std::cell::RefCell;
use std::sync::Arc;

use super::path::FieldPath;
use super::registrar::ChangeRegistrar;
use super::subscriber::{Subscriber, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the observation stack.
struct ContextEntry {
    /// The observing subscriber, or `None` inside an untracked scope.
    subscriber: Option<Arc<Subscriber>>,
    /// Paths read while this entry was on top, in read order.
    reads: Vec<FieldPath>,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the observed closure panics.
pub struct ObservationContext {
    subscriber_id: Option<SubscriberId>,
}

impl ObservationContext {
    /// Enter an observation for the given subscriber.
    ///
    /// While the returned guard is alive, tracked reads on this thread
    /// register the subscriber with the registrar that owns the field.
    pub fn enter(subscriber: Arc<Subscriber>) -> Self {
        let subscriber_id = Some(subscriber.id());
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber: Some(subscriber),
                reads: Vec::new(),
            });
        });
        Self { subscriber_id }
    }

    /// Enter a scope in which reads are not tracked.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber: None,
                reads: Vec::new(),
            });
        });
        Self {
            subscriber_id: None,
        }
    }

    /// Check if a tracking observation is active on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber.is_some())
        })
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.as_ref().map(|s| s.id()))
        })
    }

    /// Record a read of `path` on the store owning `registrar`.
    ///
    /// Called by stores from their tracked accessors.
    pub fn track(registrar: &ChangeRegistrar, path: &FieldPath) {
        let subscriber = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            let subscriber = entry.subscriber.clone()?;
            entry.reads.push(path.clone());
            Some(subscriber)
        });

        if let Some(subscriber) = subscriber {
            registrar.track(&subscriber, path.clone());
        }
    }

    /// Get the paths read in the current context.
    pub fn reads() -> Vec<FieldPath> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.reads.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ObservationContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber.as_ref().map(|s| s.id()),
                    self.subscriber_id,
                    "ObservationContext mismatch"
                );
            }
        });
    }
}
