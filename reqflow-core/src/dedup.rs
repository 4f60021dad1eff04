//! In-flight request deduplication.
//!
//! Concurrent calls for the same key share one execution. The first call
//! spawns the executor and stores a shared future under the key; callers
//! arriving before it settles receive a clone of that same future. The
//! entry is removed by the executing task itself once the outcome is
//! known, so nothing is cached past settlement.
//!
//! ```text
//! deduplicate("user:1", f) ──► spawn f() ──► Pending { id: 7, shared }
//! deduplicate("user:1", g) ──────────────────► shared.clone()   (g dropped)
//!                               f settles ──► remove "user:1" if id == 7
//! deduplicate("user:1", h) ──► spawn h() ──► Pending { id: 8, shared }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::debug;

use crate::error::{BoxError, CancelReason, CoordinationError, CoordinationResult};
use crate::metrics::CoordinationMetrics;

/// Future shared by every caller coalesced onto one execution.
pub type Coalesced<T> = Shared<BoxFuture<'static, CoordinationResult<T>>>;

struct Pending<T> {
    id: u64,
    shared: Coalesced<T>,
}

struct DedupState<K, T> {
    pending: HashMap<K, Pending<T>>,
    next_id: u64,
}

struct Inner<K, T> {
    metrics: Arc<CoordinationMetrics>,
    state: Mutex<DedupState<K, T>>,
}

impl<K: Hash + Eq, T> Inner<K, T> {
    fn lock(&self) -> MutexGuard<'_, DedupState<K, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget `key` only if it still refers to execution `id`. A `clear()`
    /// followed by a fresh call must not lose the newer entry.
    fn remove_if_current(&self, key: &K, id: u64) {
        let mut state = self.lock();
        if state.pending.get(key).is_some_and(|pending| pending.id == id) {
            state.pending.remove(key);
        }
    }
}

/// Removes the pending entry when the executing task ends, including
/// when the executor panics.
struct SettleGuard<K: Hash + Eq, T> {
    inner: Arc<Inner<K, T>>,
    key: K,
    id: u64,
}

impl<K: Hash + Eq, T> Drop for SettleGuard<K, T> {
    fn drop(&mut self) {
        self.inner.remove_if_current(&self.key, self.id);
    }
}

/// Coalesces concurrent identical operations into one execution.
pub struct Deduplicator<K, T> {
    inner: Arc<Inner<K, T>>,
}

impl<K, T> Clone for Deduplicator<K, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, T> Default for Deduplicator<K, T>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Deduplicator<K, T>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(CoordinationMetrics::new()))
    }

    pub fn with_metrics(metrics: Arc<CoordinationMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                metrics,
                state: Mutex::new(DedupState { pending: HashMap::new(), next_id: 0 }),
            }),
        }
    }

    /// Run `executor` for `key`, or join the execution already in flight.
    ///
    /// All callers coalesced onto one execution receive clones of the same
    /// future and therefore the same value or the same error instance.
    /// The executor runs on a spawned task, so it makes progress even if
    /// every caller drops its future.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn deduplicate<F, Fut, E>(&self, key: K, executor: F) -> Coalesced<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner.metrics.record_request();

        let mut state = self.inner.lock();
        if let Some(pending) = state.pending.get(&key) {
            self.inner.metrics.record_deduplication();
            debug!(key = ?key, "Joining in-flight operation");
            return pending.shared.clone();
        }

        let id = state.next_id;
        state.next_id += 1;

        // The task cannot remove its entry before it is inserted: removal
        // takes the lock held here.
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let guard = SettleGuard { inner, key: task_key, id };
            let result = executor().await.map_err(CoordinationError::executor);
            drop(guard);
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|_| Err(CoordinationError::cancelled(CancelReason::Abandoned)))
        }
        .boxed()
        .shared();

        state.pending.insert(key, Pending { id, shared: shared.clone() });
        shared
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.lock().pending.contains_key(key)
    }

    /// Number of keys with an execution in flight
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Forget every in-flight entry.
    ///
    /// Futures already handed out still settle normally; only new calls
    /// stop joining them.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        if !state.pending.is_empty() {
            debug!(forgotten = state.pending.len(), "Clearing deduplicator");
        }
        state.pending.clear();
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.inner.metrics
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let dedup = Deduplicator::<&str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counter = Arc::clone(&calls);
        let first = dedup.deduplicate("user:1", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = gate.await;
            Ok::<_, BoxError>(42)
        });

        let counter = Arc::clone(&calls);
        let second = dedup.deduplicate("user:1", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(0)
        });

        assert!(first.ptr_eq(&second));
        assert!(dedup.is_pending(&"user:1"));
        assert_eq!(dedup.pending_count(), 1);

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 42);
        assert_eq!(second.await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settled_operation_is_not_cached() {
        let dedup = Deduplicator::<&str, u32>::new();

        let first = dedup.deduplicate("k", || async { Ok::<_, BoxError>(1) });
        assert_eq!(first.await.unwrap(), 1);
        assert!(!dedup.is_pending(&"k"));

        let second = dedup.deduplicate("k", || async { Ok::<_, BoxError>(2) });
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_removed() {
        let dedup = Deduplicator::<&str, u32>::new();
        let (release, gate) = oneshot::channel::<()>();

        let first = dedup.deduplicate("k", move || async move {
            let _ = gate.await;
            Err::<u32, BoxError>("backend down".into())
        });
        let second = dedup.deduplicate("k", || async { Ok::<_, BoxError>(0) });
        release.send(()).unwrap();

        let a = first.await.unwrap_err();
        let b = second.await.unwrap_err();
        assert!(a.same_executor_error(&b));
        assert_eq!(a.to_string(), "Executor failed: backend down");
        assert!(!dedup.is_pending(&"k"));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let dedup = Deduplicator::<u32, u32>::new();
        let a = dedup.deduplicate(1, || async { Ok::<_, BoxError>(10) });
        let b = dedup.deduplicate(2, || async { Ok::<_, BoxError>(20) });

        assert!(!a.ptr_eq(&b));
        assert_eq!(dedup.pending_count(), 2);
        assert_eq!(a.await.unwrap(), 10);
        assert_eq!(b.await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_clear_keeps_existing_futures_alive() {
        let dedup = Deduplicator::<&str, u32>::new();
        let (release, gate) = oneshot::channel::<()>();

        let old = dedup.deduplicate("k", move || async move {
            let _ = gate.await;
            Ok::<_, BoxError>(1)
        });
        dedup.clear();
        assert_eq!(dedup.pending_count(), 0);

        let (release_new, gate_new) = oneshot::channel::<()>();
        let new = dedup.deduplicate("k", move || async move {
            let _ = gate_new.await;
            Ok::<_, BoxError>(2)
        });
        assert!(!old.ptr_eq(&new));

        release.send(()).unwrap();
        assert_eq!(old.await.unwrap(), 1);
        // The old execution settling must not forget the newer entry
        assert!(dedup.is_pending(&"k"));

        release_new.send(()).unwrap();
        assert_eq!(new.await.unwrap(), 2);
        assert!(!dedup.is_pending(&"k"));
    }

    #[tokio::test]
    async fn test_panicking_executor_is_abandoned() {
        let dedup = Deduplicator::<&str, u32>::new();
        let fut = dedup.deduplicate("k", || async {
            if true {
                panic!("executor bug");
            }
            Ok::<_, BoxError>(0)
        });

        let err = fut.await.unwrap_err();
        assert!(matches!(err, CoordinationError::Cancelled(CancelReason::Abandoned)));
        assert!(!dedup.is_pending(&"k"));
    }

    #[tokio::test]
    async fn test_metrics() {
        let dedup = Deduplicator::<&str, u32>::new();
        let (release, gate) = oneshot::channel::<()>();

        let first = dedup.deduplicate("k", move || async move {
            let _ = gate.await;
            Ok::<_, BoxError>(1)
        });
        let joined: Vec<_> =
            (0..3).map(|_| dedup.deduplicate("k", || async { Ok::<_, BoxError>(0) })).collect();
        release.send(()).unwrap();

        first.await.unwrap();
        for fut in joined {
            fut.await.unwrap();
        }

        let snapshot = dedup.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.deduplicated_requests, 3);
        assert!((snapshot.deduplication_rate - 0.75).abs() < 0.001);
    }
}
