//! One-shot observation of store fields.

use std::sync::Arc;

use super::context::ObservationContext;
use super::path::FieldPath;
use super::subscriber::{Subscriber, SubscriberId};

/// Handle to a pending observation started by [`observe`].
///
/// Clones share one observation. Stores only hold it weakly, so once every
/// clone is dropped the observation is cancelled and its callback freed.
#[derive(Debug, Clone)]
pub struct Observation {
    subscriber: Arc<Subscriber>,
    reads: Vec<FieldPath>,
}

impl Observation {
    pub fn id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// Paths read while the observation was tracking, in read order.
    pub fn reads(&self) -> &[FieldPath] {
        &self.reads
    }

    /// True until the observation fires or is cancelled.
    pub fn is_pending(&self) -> bool {
        !self.subscriber.is_spent()
    }

    pub fn cancel(&self) {
        self.subscriber.cancel();
    }
}

/// Run `apply`, tracking every store field it reads, and call `on_change`
/// once when any of those fields next changes.
///
/// Reads may span several stores. Writes to fields that were not read, and
/// writes that leave a value equal to what it was, never fire `on_change`.
///
/// ```rust,ignore
/// let (count, observation) = observe(
///     || store.get(&count_field),
///     || println!("count changed"),
/// );
/// ```
pub fn observe<R, A, F>(apply: A, on_change: F) -> (R, Observation)
where
    A: FnOnce() -> R,
    F: Fn() + Send + Sync + 'static,
{
    let subscriber = Arc::new(Subscriber::new(on_change));
    let (value, reads) = {
        let _ctx = ObservationContext::enter(Arc::clone(&subscriber));
        let value = apply();
        (value, ObservationContext::reads())
    };
    (value, Observation { subscriber, reads })
}

/// Run `f` with tracking suspended, even inside an enclosing observation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ObservationContext::untracked();
    f()
}
