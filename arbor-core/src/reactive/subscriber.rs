//! Subscriber types for change notification.
//!
//! A Subscriber is the callback side of an observation: it is registered with
//! every change registrar whose fields were read while it was tracking, and is
//! notified at most once when any of those fields change.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Each observation (and each change listener) gets a unique ID when created.
/// Registrars key their tables by this ID so the same subscriber reading the
/// same store twice is only recorded once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// A one-shot subscriber to tracked fields.
///
/// After the first notification (or an explicit cancel) the subscriber is
/// spent: registrars drop it the next time they see it.
pub struct Subscriber {
    id: SubscriberId,
    /// The callback to invoke when a tracked field changes.
    notify: Box<dyn Fn() + Send + Sync>,
    spent: AtomicBool,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Box::new(notify),
            spent: AtomicBool::new(false),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that a tracked field changed.
    ///
    /// Returns false if the subscriber had already fired or was cancelled.
    pub fn notify(&self) -> bool {
        if self.spent.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.notify)();
        true
    }

    /// Prevent any future notification.
    pub fn cancel(&self) {
        self.spent.store(true, Ordering::Release);
    }

    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("spent", &self.is_spent())
            .finish()
    }
}
