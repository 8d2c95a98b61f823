//! Change Registrar
//!
//! Every store owns one registrar. It remembers, per observing subscriber,
//! which field paths were read, and on a write decides who must hear about
//! it. It also fans every change out to the store's change listeners, which
//! is how an outer layer learns that a snapshot is out of date.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::path::FieldPath;
use super::subscriber::{Subscriber, SubscriberId};

/// Callback invoked with the path of every change a registrar sees.
pub type ChangeListener = Arc<dyn Fn(&FieldPath) + Send + Sync>;

struct Tracked {
    subscriber: Weak<Subscriber>,
    paths: SmallVec<[FieldPath; 4]>,
}

impl Tracked {
    /// The subscriber, unless every observation handle is gone or it has
    /// already fired.
    fn live(&self) -> Option<Arc<Subscriber>> {
        self.subscriber.upgrade().filter(|subscriber| !subscriber.is_spent())
    }
}

/// Per-store read/write tracker.
#[derive(Default)]
pub struct ChangeRegistrar {
    observers: Mutex<IndexMap<SubscriberId, Tracked>>,
    listeners: Mutex<Vec<(SubscriberId, ChangeListener)>>,
}

impl ChangeRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `subscriber` read `path`.
    ///
    /// The registrar holds subscribers weakly. Entries whose subscriber was
    /// dropped or spent are pruned whenever a new subscriber is recorded.
    pub fn track(&self, subscriber: &Arc<Subscriber>, path: FieldPath) {
        if subscriber.is_spent() {
            return;
        }
        let mut observers = self.observers.lock();
        if !observers.contains_key(&subscriber.id()) {
            observers.retain(|_, tracked| tracked.live().is_some());
        }
        let tracked = observers.entry(subscriber.id()).or_insert_with(|| Tracked {
            subscriber: Arc::downgrade(subscriber),
            paths: SmallVec::new(),
        });
        if !tracked.paths.contains(&path) {
            tracked.paths.push(path);
        }
    }

    /// Report a change at `changed`.
    ///
    /// Notifies each subscriber that read an overlapping path, removes it
    /// (subscribers are one-shot), then calls every listener. Returns the
    /// number of subscribers notified.
    pub fn notify(&self, changed: &FieldPath) -> usize {
        let mut due = Vec::new();
        self.observers.lock().retain(|_, tracked| {
            let Some(subscriber) = tracked.live() else {
                return false;
            };
            if tracked.paths.iter().any(|path| path.overlaps(changed)) {
                due.push(subscriber);
                return false;
            }
            true
        });

        // Callbacks run with no registrar lock held; they are free to read
        // the store again and start a new observation.
        let notified = due.iter().filter(|subscriber| subscriber.notify()).count();

        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(changed);
        }

        tracing::trace!(path = %changed, notified, "change registrar notified");
        notified
    }

    /// Add a listener called for every change, returning its ID.
    pub fn add_listener(&self, listener: ChangeListener) -> SubscriberId {
        let id = SubscriberId::new();
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: SubscriberId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of live subscribers currently tracking this registrar.
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .values()
            .filter(|tracked| tracked.live().is_some())
            .count()
    }

    /// Paths a subscriber has read, in first-read order.
    pub fn tracked_paths(&self, id: SubscriberId) -> Vec<FieldPath> {
        self.observers
            .lock()
            .get(&id)
            .map(|tracked| tracked.paths.to_vec())
            .unwrap_or_default()
    }

    /// Drop every subscriber and listener.
    pub fn clear(&self) {
        self.observers.lock().clear();
        self.listeners.lock().clear();
    }
}

impl fmt::Debug for ChangeRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRegistrar")
            .field("observers", &self.observer_count())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
