//! Keyed batch coordinator.
//!
//! Requests sharing a key are appended to that key's open batch. The batch
//! is flushed exactly once: either when it reaches `max_batch_size`, or
//! when its window timer expires. Every flush first detaches the batch
//! from the key under the state lock, so requests arriving while the
//! executor is running open a fresh batch.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::config::BatchConfig;
use crate::clock::{tokio_clock, SharedClock};
use crate::error::{BoxError, CancelReason, CoordinationError};
use crate::handle::{settle, Handle, Settler};
use crate::metrics::CoordinationMetrics;

type BatchExecutor<P, R> =
    Box<dyn FnOnce(Vec<P>) -> BoxFuture<'static, Result<Vec<R>, BoxError>> + Send>;

/// What caused a batch to be flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached `max_batch_size`
    Size,
    /// The collection window expired
    Timer,
    /// `flush()` was called
    Manual,
}

/// One caller's pending unit of work within a batch
struct QueuedRequest<P, R> {
    payload: P,
    settler: Settler<R>,
}

/// An open batch; lives between the first enqueue and the flush
struct Batch<P, R> {
    items: Vec<QueuedRequest<P, R>>,
    executor: BatchExecutor<P, R>,
    timer: Option<AbortHandle>,
    timer_token: u64,
}

impl<P, R> Batch<P, R> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct BatchState<K, P, R> {
    batches: HashMap<K, Batch<P, R>>,
    next_token: u64,
}

struct Inner<K, P, R> {
    config: BatchConfig,
    clock: SharedClock,
    metrics: Arc<CoordinationMetrics>,
    state: Mutex<BatchState<K, P, R>>,
}

/// Groups requests sharing a key into a single executor call.
///
/// Cloning a coordinator yields another handle to the same batches.
pub struct BatchCoordinator<K, P, R> {
    inner: Arc<Inner<K, P, R>>,
}

impl<K, P, R> Clone for BatchCoordinator<K, P, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, P, R> BatchCoordinator<K, P, R>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    /// Create a coordinator with its own metrics and the tokio clock
    pub fn new(config: BatchConfig) -> Self {
        Self::from_parts(config, tokio_clock(), Arc::new(CoordinationMetrics::new()))
    }

    /// Create a coordinator from injected collaborators
    pub fn from_parts(
        config: BatchConfig,
        clock: SharedClock,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                metrics,
                state: Mutex::new(BatchState { batches: HashMap::new(), next_token: 0 }),
            }),
        }
    }

    /// Add `payload` to the batch for `key`.
    ///
    /// The request is queued before this returns. `executor` receives the
    /// batch's payloads in insertion order and must return exactly one
    /// result per payload; only the executor of the request that opened
    /// the batch is invoked.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn batch<F, Fut, E>(&self, key: K, payload: P, executor: F) -> Handle<R>
    where
        F: FnOnce(Vec<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner.metrics.record_request();
        let (settler, handle) = Handle::channel();
        let request = QueuedRequest { payload, settler };
        let max_batch_size = self.inner.config.effective_max_batch_size();

        let mut state = self.inner.lock();
        let token = state.next_token;
        state.next_token += 1;

        let batch = match state.batches.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let batch = entry.into_mut();
                batch.items.push(request);
                batch
            }
            Entry::Vacant(entry) => entry.insert(Batch {
                items: vec![request],
                executor: box_executor(executor),
                timer: None,
                timer_token: token,
            }),
        };

        batch.cancel_timer();

        if batch.items.len() >= max_batch_size {
            if let Some(batch) = state.batches.remove(&key) {
                drop(state);
                self.inner.dispatch(key, batch, FlushTrigger::Size);
            }
            return handle;
        }

        batch.timer_token = token;
        let sleep = self.inner.clock.sleep(self.inner.config.batch_delay());
        let inner = Arc::clone(&self.inner);
        let timer_key = key;
        let timer = tokio::spawn(async move {
            sleep.await;
            inner.flush_if_current(timer_key, token);
        });
        batch.timer = Some(timer.abort_handle());

        handle
    }

    /// Flush the pending batch for `key` now. Returns false if none was open.
    pub fn flush(&self, key: &K) -> bool {
        let detached = {
            let mut state = self.inner.lock();
            state.batches.remove(key)
        };
        match detached {
            Some(mut batch) => {
                batch.cancel_timer();
                self.inner.dispatch(key.clone(), batch, FlushTrigger::Manual);
                true
            }
            None => false,
        }
    }

    /// Settle every queued (unflushed) request with a cancellation error.
    ///
    /// Batches already handed to their executor are unaffected. Returns
    /// the number of requests cancelled.
    pub fn clear(&self) -> usize {
        let batches: Vec<_> = {
            let mut state = self.inner.lock();
            state.batches.drain().collect()
        };

        let mut cancelled = 0;
        for (key, mut batch) in batches {
            batch.cancel_timer();
            debug!(key = ?key, size = batch.items.len(), "Cancelling queued batch");
            for item in batch.items {
                settle(item.settler, Err(CoordinationError::cancelled(CancelReason::Cleared)));
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            self.inner.metrics.record_cancelled(cancelled);
            warn!(cancelled, "Batch coordinator cleared with queued requests");
        }
        cancelled
    }

    /// Number of queued requests for `key`
    pub fn pending_count(&self, key: &K) -> usize {
        self.inner.lock().batches.get(key).map_or(0, |batch| batch.items.len())
    }

    /// Keys with an open batch
    pub fn pending_keys(&self) -> Vec<K> {
        self.inner.lock().batches.keys().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().batches.is_empty()
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }
}

impl<K, P, R> Inner<K, P, R>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, BatchState<K, P, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer expiry: flush only if the batch is still the one this timer
    /// was armed for.
    fn flush_if_current(&self, key: K, token: u64) {
        let detached = {
            let mut state = self.lock();
            match state.batches.get(&key) {
                Some(batch) if batch.timer_token == token => state.batches.remove(&key),
                _ => None,
            }
        };
        if let Some(mut batch) = detached {
            batch.timer = None;
            self.dispatch(key, batch, FlushTrigger::Timer);
        }
    }

    fn dispatch(&self, key: K, batch: Batch<P, R>, trigger: FlushTrigger) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(run_batch(metrics, key, batch, trigger));
    }
}

async fn run_batch<K: Debug, P, R>(
    metrics: Arc<CoordinationMetrics>,
    key: K,
    batch: Batch<P, R>,
    trigger: FlushTrigger,
) {
    let Batch { items, executor, .. } = batch;
    let (payloads, settlers): (Vec<P>, Vec<Settler<R>>) =
        items.into_iter().map(|item| (item.payload, item.settler)).unzip();
    let size = payloads.len();

    metrics.record_batch(size);
    debug!(key = ?key, size, trigger = ?trigger, "Flushing batch");

    match executor(payloads).await {
        Ok(results) if results.len() == size => {
            for (settler, result) in settlers.into_iter().zip(results) {
                settle(settler, Ok(result));
            }
        }
        Ok(results) => {
            metrics.record_contract_violation();
            warn!(key = ?key, expected = size, actual = results.len(), "Batch executor broke result contract");
            let err = CoordinationError::contract(size, results.len());
            for settler in settlers {
                settle(settler, Err(err.clone()));
            }
        }
        Err(e) => {
            let err = CoordinationError::executor(e);
            debug!(key = ?key, size, error = %err, "Batch executor failed");
            for settler in settlers {
                settle(settler, Err(err.clone()));
            }
        }
    }
}

fn box_executor<P, R, F, Fut, E>(executor: F) -> BatchExecutor<P, R>
where
    F: FnOnce(Vec<P>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move |payloads| {
        let fut = executor(payloads);
        async move { fut.await.map_err(Into::into) }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::Notify;

    use super::*;
    use crate::clock::ManualClock;

    type Calls = Arc<Mutex<Vec<Vec<String>>>>;

    /// Executor that records its input and echoes `r:<payload>`.
    fn echo(calls: &Calls) -> impl FnOnce(Vec<String>) -> BoxFuture<'static, Result<Vec<String>, BoxError>> {
        let calls = Arc::clone(calls);
        move |payloads: Vec<String>| {
            calls.lock().unwrap().push(payloads.clone());
            async move {
                Ok::<_, BoxError>(payloads.into_iter().map(|p| format!("r:{p}")).collect::<Vec<_>>())
            }
            .boxed()
        }
    }

    fn sizes(calls: &Calls) -> Vec<usize> {
        calls.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn coordinator(
        max_batch_size: usize,
        clock: SharedClock,
    ) -> BatchCoordinator<&'static str, String, String> {
        let config = BatchConfig { batch_delay_ms: 50, max_batch_size };
        BatchCoordinator::from_parts(config, clock, Arc::new(CoordinationMetrics::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_assigned_by_index() {
        let batcher = BatchCoordinator::new(BatchConfig::default());
        let exec = |payloads: Vec<&'static str>| async move {
            assert_eq!(payloads, vec!["req1", "req2"]);
            Ok::<_, BoxError>(vec!["r1", "r2"])
        };

        let first = batcher.batch("GET:/a", "req1", exec);
        let second = batcher.batch("GET:/a", "req2", exec);

        assert_eq!(first.await.unwrap(), "r1");
        assert_eq!(second.await.unwrap(), "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_collects_into_single_call() {
        let calls: Calls = Arc::default();
        let batcher = coordinator(10, tokio_clock());

        let handles: Vec<_> = (0..7)
            .map(|i| batcher.batch("GET:/users", format!("u{i}"), echo(&calls)))
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), format!("r:u{i}"));
        }
        assert_eq!(sizes(&calls), vec![7]);
        assert_eq!(calls.lock().unwrap()[0][0], "u0");
    }

    #[tokio::test]
    async fn test_size_threshold_flushes_immediately() {
        let calls: Calls = Arc::default();
        let clock = ManualClock::new();
        let batcher = coordinator(3, clock.clone());

        let handles: Vec<_> = (0..5)
            .map(|i| batcher.batch("k", format!("{i}"), echo(&calls)))
            .collect();

        // The first three flushed without any timer firing.
        tokio::task::yield_now().await;
        assert_eq!(sizes(&calls), vec![3]);
        assert_eq!(batcher.pending_count(&"k"), 2);

        assert_eq!(clock.fire_all(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sizes(&calls), vec![3, 2]);
        assert_eq!(calls.lock().unwrap()[1], vec!["3".to_string(), "4".to_string()]);
    }

    #[tokio::test]
    async fn test_single_timer_per_key() {
        let calls: Calls = Arc::default();
        let clock = ManualClock::new();
        let batcher = coordinator(10, clock.clone());

        let a1 = batcher.batch("a", "1".to_string(), echo(&calls));
        let a2 = batcher.batch("a", "2".to_string(), echo(&calls));
        let a3 = batcher.batch("a", "3".to_string(), echo(&calls));
        let b1 = batcher.batch("b", "1".to_string(), echo(&calls));

        // Let aborted timer tasks drop their sleeps.
        tokio::task::yield_now().await;
        assert_eq!(clock.armed(), 2);

        clock.fire_all();
        for handle in [a1, a2, a3, b1] {
            handle.await.unwrap();
        }
        let mut observed = sizes(&calls);
        observed.sort_unstable();
        assert_eq!(observed, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rearms_on_each_request() {
        let calls: Calls = Arc::default();
        let batcher = coordinator(10, tokio_clock());

        let first = batcher.batch("k", "1".to_string(), echo(&calls));
        tokio::time::advance(Duration::from_millis(30)).await;
        let second = batcher.batch("k", "2".to_string(), echo(&calls));
        tokio::time::advance(Duration::from_millis(30)).await;
        tokio::task::yield_now().await;

        // 60ms after the first request, but only 30ms after the second.
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(batcher.pending_count(&"k"), 2);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(sizes(&calls), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_error_shared_by_all_callers() {
        let batcher: BatchCoordinator<&str, u32, u32> = BatchCoordinator::new(BatchConfig::default());
        let failing = |_: Vec<u32>| async { Err::<Vec<u32>, _>("backend unavailable") };

        let first = batcher.batch("k", 1, failing);
        let second = batcher.batch("k", 2, failing);

        let first = first.await.unwrap_err();
        let second = second.await.unwrap_err();
        assert!(first.same_executor_error(&second));
        assert_eq!(first.to_string(), "Executor failed: backend unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_length_is_contract_violation() {
        let batcher: BatchCoordinator<&str, u32, u32> = BatchCoordinator::new(BatchConfig::default());
        let short = |payloads: Vec<u32>| async move {
            Ok::<_, BoxError>(payloads.into_iter().skip(1).collect::<Vec<u32>>())
        };

        let handles = vec![batcher.batch("k", 1, short), batcher.batch("k", 2, short)];
        for handle in handles {
            let err = handle.await.unwrap_err();
            assert!(matches!(err, CoordinationError::ContractViolation { expected: 2, actual: 1 }));
        }
        assert_eq!(batcher.metrics().snapshot().contract_violations, 1);
    }

    #[tokio::test]
    async fn test_clear_cancels_queued_requests() {
        let calls: Calls = Arc::default();
        let clock = ManualClock::new();
        let batcher = coordinator(10, clock.clone());

        let handles: Vec<_> = (0..3)
            .map(|i| batcher.batch("k", format!("{i}"), echo(&calls)))
            .collect();

        assert_eq!(batcher.clear(), 3);
        for handle in handles {
            let err = handle.await.unwrap_err();
            assert!(matches!(err, CoordinationError::Cancelled(CancelReason::Cleared)));
        }

        clock.fire_all();
        tokio::task::yield_now().await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(batcher.is_idle());
        assert_eq!(batcher.metrics().snapshot().cancelled_requests, 3);
    }

    #[tokio::test]
    async fn test_requests_during_execution_open_new_batch() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(AtomicUsize::new(0));
        let batcher: BatchCoordinator<&str, u32, u32> = coordinator_u32(2);

        let exec = {
            let release = Arc::clone(&release);
            let started = Arc::clone(&started);
            move |payloads: Vec<u32>| async move {
                started.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok::<_, BoxError>(payloads)
            }
        };

        let first = batcher.batch("k", 1, exec.clone());
        let second = batcher.batch("k", 2, exec.clone());
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // In-flight batch is detached; this opens a fresh one.
        let third = batcher.batch("k", 3, exec.clone());
        assert_eq!(batcher.pending_count(&"k"), 1);

        release.notify_one();
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 2);

        assert!(batcher.flush(&"k"));
        release.notify_one();
        assert_eq!(third.await.unwrap(), 3);
    }

    fn coordinator_u32(max_batch_size: usize) -> BatchCoordinator<&'static str, u32, u32> {
        let config = BatchConfig { batch_delay_ms: 50, max_batch_size };
        BatchCoordinator::from_parts(config, ManualClock::new(), Arc::new(CoordinationMetrics::new()))
    }

    #[tokio::test]
    async fn test_manual_flush() {
        let calls: Calls = Arc::default();
        let batcher = coordinator(10, ManualClock::new());

        let handle = batcher.batch("k", "x".to_string(), echo(&calls));
        assert!(batcher.flush(&"k"));
        assert!(!batcher.flush(&"k"));
        assert_eq!(handle.await.unwrap(), "r:x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_for_two_full_batches() {
        let calls: Calls = Arc::default();
        let batcher = coordinator(5, tokio_clock());

        let handles: Vec<_> = (0..10)
            .map(|i| batcher.batch("k", format!("{i}"), echo(&calls)))
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = batcher.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 10);
        assert_eq!(snapshot.total_batches, 2);
        assert!((snapshot.batching_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.requests_saved, 8);
    }
}
