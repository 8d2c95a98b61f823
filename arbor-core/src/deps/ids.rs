//! Identifier generator dependency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::DependencyKey;

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Random v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Sequential identifiers (`00000000-0000-0000-0000-000000000000`, `...0001`,
/// ...), for deterministic tests.
#[derive(Debug, Default)]
pub struct IncrementingIds {
    next: AtomicU64,
}

impl IdGenerator for IncrementingIds {
    fn next_id(&self) -> Uuid {
        Uuid::from_u128(u128::from(self.next.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Key for the store's [`IdGenerator`]. Defaults to [`RandomIds`].
pub struct IdsKey;

impl DependencyKey for IdsKey {
    type Value = Arc<dyn IdGenerator>;
    const NAME: &'static str = "ids";

    fn default_value() -> Self::Value {
        Arc::new(RandomIds)
    }
}
