//! Dependency Environment
//!
//! External services a model talks to (clocks, identifier generators,
//! back-ends) are looked up by key from the store's environment instead of
//! being reached through globals.
//!
//! # Scoping
//!
//! An environment is a persistent chain of frames. Overriding a key pushes a
//! new frame onto the store's own chain; a child store takes a snapshot of
//! its parent's chain when it is created. So an override is seen by the
//! store that made it and by descendants created afterward, never by
//! ancestors, siblings, or descendants that already existed.

mod clock;
mod ids;

pub use clock::{Clock, ClockKey, ImmediateClock, SystemClock};
pub use ids::{IdGenerator, IdsKey, IncrementingIds, RandomIds};

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

/// A named dependency and the value used when nothing overrides it.
///
/// ```rust,ignore
/// struct ApiBase;
///
/// impl DependencyKey for ApiBase {
///     type Value = String;
///     const NAME: &'static str = "api_base";
///
///     fn default_value() -> String {
///         "https://localhost".into()
///     }
/// }
/// ```
pub trait DependencyKey: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    const NAME: &'static str;

    fn default_value() -> Self::Value;
}

#[derive(Clone)]
struct Slot {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

struct Frame {
    values: IndexMap<TypeId, Slot>,
    parent: Option<Arc<Frame>>,
}

/// An inheritable, overridable set of dependency values.
#[derive(Clone, Default)]
pub struct DependencyEnvironment {
    head: Option<Arc<Frame>>,
}

impl DependencyEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// This environment with `K` overridden.
    pub fn with<K: DependencyKey>(mut self, value: K::Value) -> Self {
        self.set::<K>(value);
        self
    }

    /// Override `K` in this environment.
    pub fn set<K: DependencyKey>(&mut self, value: K::Value) {
        let mut values = IndexMap::with_capacity(1);
        values.insert(
            TypeId::of::<K>(),
            Slot {
                name: K::NAME,
                value: Arc::new(value),
            },
        );
        self.head = Some(Arc::new(Frame {
            values,
            parent: self.head.take(),
        }));
    }

    /// The nearest value for `K`, or its default.
    pub fn get<K: DependencyKey>(&self) -> K::Value {
        self.lookup::<K>().unwrap_or_else(K::default_value)
    }

    /// The nearest override for `K`, if any.
    pub fn lookup<K: DependencyKey>(&self) -> Option<K::Value> {
        let key = TypeId::of::<K>();
        self.frames()
            .find_map(|frame| frame.values.get(&key))
            .and_then(|slot| slot.value.downcast_ref::<K::Value>())
            .cloned()
    }

    pub fn is_overridden<K: DependencyKey>(&self) -> bool {
        let key = TypeId::of::<K>();
        self.frames().any(|frame| frame.values.contains_key(&key))
    }

    /// Names of overridden keys, nearest first, each listed once.
    pub fn overridden(&self) -> Vec<&'static str> {
        let mut seen = IndexMap::new();
        for frame in self.frames() {
            for (key, slot) in &frame.values {
                seen.entry(*key).or_insert(slot.name);
            }
        }
        seen.into_values().collect()
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.head.as_deref(), |frame| frame.parent.as_deref())
    }
}

impl fmt::Debug for DependencyEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyEnvironment")
            .field("overridden", &self.overridden())
            .finish()
    }
}
