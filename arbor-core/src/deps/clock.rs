//! Clock dependency.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

use super::DependencyKey;

/// Source of wall-clock time and delays.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// The real clock: system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// A clock whose sleeps finish at once and advance its own time.
///
/// Useful in tests that exercise delay-driven logic without waiting.
#[derive(Debug)]
pub struct ImmediateClock {
    now: Mutex<SystemTime>,
}

impl ImmediateClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
}

impl Default for ImmediateClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for ImmediateClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        *self.now.lock() += duration;
        future::ready(()).boxed()
    }
}

/// Key for the store's [`Clock`]. Defaults to [`SystemClock`].
pub struct ClockKey;

impl DependencyKey for ClockKey {
    type Value = Arc<dyn Clock>;
    const NAME: &'static str = "clock";

    fn default_value() -> Self::Value {
        Arc::new(SystemClock)
    }
}
