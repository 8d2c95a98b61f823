//! Fine-Grained Change Tracking
//!
//! This module implements the read/write tracking that decides which
//! observers hear about a state change.
//!
//! # Concepts
//!
//! ## Field paths
//!
//! A [`FieldPath`] names a location inside a model's state, and a [`Field`]
//! pairs a path with typed accessors. Stores only read and write through
//! fields, so every access carries the path the registrar needs.
//!
//! ## Observations
//!
//! [`observe`] runs a closure with a [`Subscriber`] on the thread-local
//! [`ObservationContext`] stack. Each tracked read registers the subscriber
//! with the store's [`ChangeRegistrar`] under the path that was read.
//!
//! ## Notification
//!
//! A write at path P notifies the subscribers that read P, an ancestor of P,
//! or a descendant of P. Subscribers are one-shot: after firing they are
//! dropped and the observer re-observes if it wants further changes.
//!
//! # Implementation Notes
//!
//! Tracking is thread-local and registration is per store, so observations
//! cost nothing for stores that are never read inside one.

mod context;
mod observe;
mod path;
mod registrar;
mod subscriber;

pub use context::ObservationContext;
pub use observe::{observe, untracked, Observation};
pub use path::{Field, FieldPath, Segment};
pub use registrar::{ChangeListener, ChangeRegistrar};
pub use subscriber::{Subscriber, SubscriberId};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn observe_registers_reads_with_the_registrar() {
        let registrar = ChangeRegistrar::new();
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let (value, observation) = observe(
            || {
                ObservationContext::track(&registrar, &FieldPath::key("count"));
                7
            },
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(value, 7);
        assert_eq!(observation.reads(), &[FieldPath::key("count")]);
        assert!(observation.is_pending());

        registrar.notify(&FieldPath::key("label"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registrar.notify(&FieldPath::key("count"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!observation.is_pending());
    }

    #[test]
    fn cancelled_observation_is_silent() {
        let registrar = ChangeRegistrar::new();
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let ((), observation) = observe(
            || ObservationContext::track(&registrar, &FieldPath::key("count")),
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        observation.cancel();
        registrar.notify(&FieldPath::key("count"));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn untracked_reads_inside_observe_are_ignored() {
        let registrar = ChangeRegistrar::new();

        let ((), observation) = observe(
            || untracked(|| ObservationContext::track(&registrar, &FieldPath::key("count"))),
            || {},
        );

        assert!(observation.reads().is_empty());
        assert_eq!(registrar.observer_count(), 0);
    }

    #[test]
    fn dropped_observation_is_released() {
        let registrar = ChangeRegistrar::new();
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let ((), observation) = observe(
            || ObservationContext::track(&registrar, &FieldPath::key("count")),
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        let copy = observation.clone();
        drop(observation);
        assert_eq!(registrar.observer_count(), 1);

        drop(copy);
        assert_eq!(registrar.observer_count(), 0);
        assert_eq!(Arc::strong_count(&fired), 1);

        registrar.notify(&FieldPath::key("count"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
