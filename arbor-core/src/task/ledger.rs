//! Task Ledger
//!
//! Each store keeps a ledger of the named asynchronous work it started. The
//! ledger owns the cancellation handle for every entry; the work itself only
//! holds weak references back to its store, so cancelling (or dropping) the
//! store is enough to stop it.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Cancelling an entry fires its token and
//! removes it from the ledger at once; the spawned future is dropped the next
//! time it reaches a suspension point. Any mutation it tries to apply after
//! the token fired is refused by [`TaskContext::apply`](super::TaskContext::apply).

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RuntimeError};
use crate::graph::StoreId;

/// Name under which a task is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskName(Cow<'static, str>);

impl TaskName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TaskName {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for TaskName {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// Unique identifier for one run of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

struct Entry {
    id: TaskId,
    token: CancellationToken,
}

struct LedgerInner {
    owner: StoreId,
    entries: Mutex<IndexMap<TaskName, Entry>>,
}

impl LedgerInner {
    /// Remove `name` if it still refers to run `id`.
    fn finish(&self, name: &TaskName, id: TaskId) {
        let mut entries = self.entries.lock();
        if entries.get(name).is_some_and(|entry| entry.id == id) {
            entries.shift_remove(name);
        }
    }
}

/// Keeps the running count up while a spawned task is alive.
struct RunningGuard(Arc<watch::Sender<usize>>);

impl RunningGuard {
    fn new(running: &Arc<watch::Sender<usize>>) -> Self {
        running.send_modify(|n| *n += 1);
        Self(Arc::clone(running))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Per-store table of named, cancellable asynchronous work.
pub struct TaskLedger {
    inner: Arc<LedgerInner>,
    running: Arc<watch::Sender<usize>>,
    runtime: Option<Handle>,
}

impl TaskLedger {
    /// Create a ledger for `owner`. Tasks run on `runtime`, or on the
    /// ambient tokio runtime at the time they are started.
    pub fn new(owner: StoreId, runtime: Option<Handle>) -> Self {
        let (running, _) = watch::channel(0);
        Self {
            inner: Arc::new(LedgerInner {
                owner,
                entries: Mutex::new(IndexMap::new()),
            }),
            running: Arc::new(running),
            runtime,
        }
    }

    pub(crate) fn runtime(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }

    /// Start `work` under `name`.
    ///
    /// With `supersede`, a running entry of the same name is cancelled first.
    /// Without it, a running entry wins and this call returns
    /// [`RuntimeError::AlreadyRunning`]. `scope` is the token of the task
    /// making the request, if any: a cancelled task cannot start new work.
    pub fn run<W, F>(
        &self,
        name: TaskName,
        supersede: bool,
        scope: Option<&CancellationToken>,
        work: W,
    ) -> Result<TaskId>
    where
        W: FnOnce(CancellationToken) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        if scope.is_some_and(|token| token.is_cancelled()) {
            return Err(RuntimeError::TaskCancelled { task: name });
        }
        let runtime = match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => return Err(RuntimeError::NoRuntime { task: name }),
        };

        let id = TaskId::new();
        let token = scope.map_or_else(CancellationToken::new, |parent| parent.child_token());
        {
            let mut entries = self.inner.entries.lock();
            if let Some(existing) = entries.get(&name) {
                if !supersede {
                    return Err(RuntimeError::AlreadyRunning {
                        store: self.inner.owner,
                        task: name,
                    });
                }
                existing.token.cancel();
                tracing::debug!(store = %self.inner.owner, task = %name, "superseded running task");
            }
            let entry = Entry {
                id,
                token: token.clone(),
            };
            entries.insert(name.clone(), entry);
        }

        let future = work(token.clone());
        let guard = RunningGuard::new(&self.running);
        let ledger: Weak<LedgerInner> = Arc::downgrade(&self.inner);
        let owner = self.inner.owner;

        tracing::debug!(store = %owner, task = %name, %id, supersede, "task started");
        runtime.spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::trace!(store = %owner, task = %name, %id, "task cancelled");
                }
                _ = future => {
                    tracing::trace!(store = %owner, task = %name, %id, "task completed");
                }
            }
            if let Some(ledger) = ledger.upgrade() {
                ledger.finish(&name, id);
            }
        });

        Ok(id)
    }

    /// Cancel the entry under `name`. Returns false if there was none.
    pub fn cancel(&self, name: &TaskName) -> bool {
        let entry = self.inner.entries.lock().shift_remove(name);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!(
                    store = %self.inner.owner,
                    task = %name,
                    "task cancelled by request"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every entry, returning how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(TaskName, Entry)> = self.inner.entries.lock().drain(..).collect();
        for (_, entry) in &drained {
            entry.token.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(
                store = %self.inner.owner,
                count = drained.len(),
                "cancelled all tasks"
            );
        }
        drained.len()
    }

    pub fn is_running(&self, name: &TaskName) -> bool {
        self.inner.entries.lock().contains_key(name)
    }

    /// Names of the running entries, oldest first.
    pub fn names(&self) -> Vec<TaskName> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of spawned futures that have not yet finished, including
    /// cancelled ones that have not reached a suspension point.
    pub fn in_flight(&self) -> usize {
        *self.running.borrow()
    }

    /// Wait until every spawned future has finished.
    pub async fn quiesce(&self) {
        let mut running = self.running.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = running.wait_for(|n| *n == 0).await;
    }
}

impl fmt::Debug for TaskLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLedger")
            .field("owner", &self.inner.owner)
            .field("entries", &self.names())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32};
    use std::time::Duration;

    fn ledger() -> TaskLedger {
        TaskLedger::new(StoreId::new(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_run_cancels_previous_entry() {
        let ledger = ledger();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));

        let flag = first.clone();
        ledger
            .run("load".into(), true, None, move |_| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let flag = second.clone();
        ledger
            .run("load".into(), true, None, move |_| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_superseding_duplicate_is_refused() {
        let ledger = ledger();
        ledger
            .run("poll".into(), false, None, |token| async move {
                token.cancelled().await;
            })
            .unwrap();

        let err = ledger
            .run("poll".into(), false, None, |_| async {})
            .unwrap_err();

        assert!(matches!(err, RuntimeError::AlreadyRunning { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_empties_the_ledger_and_quiesces() {
        let ledger = ledger();
        let finished = Arc::new(AtomicI32::new(0));

        for name in ["a", "b", "c"] {
            let finished = finished.clone();
            ledger
                .run(name.into(), true, None, move |_| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(ledger.len(), 3);

        assert_eq!(ledger.cancel_all(), 3);
        assert!(ledger.is_empty());

        ledger.quiesce().await;
        assert_eq!(ledger.in_flight(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_entries_leave_the_ledger() {
        let ledger = ledger();
        ledger
            .run("quick".into(), true, None, |_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
            .unwrap();
        assert!(ledger.is_running(&"quick".into()));

        ledger.quiesce().await;
        assert!(!ledger.is_running(&"quick".into()));
    }

    #[tokio::test]
    async fn cancelled_scope_cannot_start_work() {
        let ledger = ledger();
        let scope = CancellationToken::new();
        scope.cancel();

        let err = ledger
            .run("nested".into(), true, Some(&scope), |_| async {})
            .unwrap_err();

        assert!(matches!(err, RuntimeError::TaskCancelled { .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn run_without_runtime_is_refused() {
        let ledger = ledger();
        let err = ledger.run("orphan".into(), true, None, |_| async {}).unwrap_err();
        assert!(matches!(err, RuntimeError::NoRuntime { .. }));
    }

    #[test]
    fn cancel_is_idempotent() {
        let ledger = ledger();
        assert!(!ledger.cancel(&"missing".into()));
    }
}
