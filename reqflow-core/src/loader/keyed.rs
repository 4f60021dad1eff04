//! Batch-and-cache loader for point lookups.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, JoinAll};
use futures::FutureExt;
use tracing::{debug, warn};

use super::cache::KeyCache;
use super::config::LoaderConfig;
use crate::clock::{tokio_clock, SharedClock};
use crate::dedup::Coalesced;
use crate::error::{BoxError, CancelReason, CoordinationError, CoordinationResult};
use crate::handle::{settle, Handle, Settler};
use crate::metrics::CoordinationMetrics;

/// Upper bound on how many window periods continuous traffic can keep a
/// collection window open.
const MAX_WINDOW_PERIODS: u32 = 16;

type BatchLoadFn<K, V> =
    Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<V>, BoxError>> + Send + Sync>;

/// A key waiting for the next dispatch, with the deferred that settles it
struct PendingLoad<K, V> {
    key: K,
    id: u64,
    settler: Settler<V>,
}

/// A load that has been handed out but not settled yet
struct InFlight<V> {
    id: u64,
    shared: Coalesced<V>,
}

struct LoaderState<K: Hash + Eq, V> {
    /// Settled values; subject to LRU capacity and TTL
    cache: KeyCache<K, Coalesced<V>>,
    /// Unsettled loads, never evicted by capacity or expiry
    in_flight: HashMap<K, InFlight<V>>,
    queue: Vec<PendingLoad<K, V>>,
    dispatch_scheduled: bool,
    next_id: u64,
}

struct Inner<K: Hash + Eq, V> {
    config: LoaderConfig,
    clock: SharedClock,
    batch_load_fn: BatchLoadFn<K, V>,
    metrics: Arc<CoordinationMetrics>,
    state: Mutex<LoaderState<K, V>>,
}

/// Merges point lookups issued in the same collection window into one
/// `batch_load_fn` call and memoizes each key's outcome.
///
/// Every `load` returns a shared future. The future for a key is recorded
/// as in flight before the key is queued, and the dispatch step owns the
/// matching settler, so an in-flight entry always resolves once its batch
/// does. Settled values move into the LRU/TTL cache when caching is on.
pub struct KeyedLoader<K: Hash + Eq, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K: Hash + Eq, V> Clone for KeyedLoader<K, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, V> KeyedLoader<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a loader backed by `batch_load_fn`.
    ///
    /// `batch_load_fn` receives the keys of one dispatch and must return
    /// one value per key, index-aligned.
    pub fn new<F, Fut, E>(config: LoaderConfig, batch_load_fn: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::with_metrics(config, Arc::new(CoordinationMetrics::new()), batch_load_fn)
    }

    pub fn with_metrics<F, Fut, E>(
        config: LoaderConfig,
        metrics: Arc<CoordinationMetrics>,
        batch_load_fn: F,
    ) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::from_parts(config, tokio_clock(), metrics, batch_load_fn)
    }

    /// Create a loader whose collection window runs on `clock`
    pub fn from_parts<F, Fut, E>(
        config: LoaderConfig,
        clock: SharedClock,
        metrics: Arc<CoordinationMetrics>,
        batch_load_fn: F,
    ) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let batch_load_fn: BatchLoadFn<K, V> = Arc::new(move |keys| {
            let fut = batch_load_fn(keys);
            async move { fut.await.map_err(Into::into) }.boxed()
        });
        let cache = KeyCache::new(config.cache_capacity, config.cache_ttl());

        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                batch_load_fn,
                metrics,
                state: Mutex::new(LoaderState {
                    cache,
                    in_flight: HashMap::new(),
                    queue: Vec::new(),
                    dispatch_scheduled: false,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Load the value for `key`.
    ///
    /// Repeated loads of a key while it is in flight or memoized return
    /// clones of the same future. New keys are queued and dispatched
    /// together once the collection window closes, or immediately once the
    /// queue reaches `max_batch_size`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(&self, key: K) -> Coalesced<V> {
        self.inner.metrics.record_request();

        let mut state = self.inner.lock();
        if let Some(existing) = state.lookup(&key) {
            drop(state);
            self.inner.metrics.record_deduplication();
            return existing;
        }

        let id = state.next_id;
        state.next_id += 1;

        let (settler, handle) = Handle::channel();
        let shared = handle.boxed().shared();
        state.in_flight.insert(key.clone(), InFlight { id, shared: shared.clone() });
        state.queue.push(PendingLoad { key, id, settler });

        let full = self
            .inner
            .config
            .effective_max_batch_size()
            .is_some_and(|max| state.queue.len() >= max);

        if full {
            let batch = std::mem::take(&mut state.queue);
            drop(state);
            tokio::spawn(Arc::clone(&self.inner).run_batch(batch));
        } else if !state.dispatch_scheduled {
            state.dispatch_scheduled = true;
            tokio::spawn(Arc::clone(&self.inner).dispatch_queued());
        }

        shared
    }

    /// Load several keys; all of them join the current collection window.
    pub fn load_many(&self, keys: impl IntoIterator<Item = K>) -> JoinAll<Coalesced<V>> {
        future::join_all(keys.into_iter().map(|key| self.load(key)).collect::<Vec<_>>())
    }

    /// Seed the cache with a known value. Returns false if the key already
    /// has an entry or caching is disabled.
    pub fn prime(&self, key: K, value: V) -> bool {
        if !self.inner.config.cache {
            return false;
        }

        let mut state = self.inner.lock();
        if state.lookup(&key).is_some() {
            return false;
        }

        let ready = future::ready(Ok(value)).boxed().shared();
        state.cache.insert(key, ready);
        true
    }

    /// Forget the entry for `key`; the next load re-issues work
    pub fn clear_key(&self, key: &K) -> bool {
        let mut state = self.inner.lock();
        let in_flight = state.in_flight.remove(key).is_some();
        state.cache.remove(key) || in_flight
    }

    /// Forget every entry. Loads already dispatched still settle.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.in_flight.clear();
        state.cache.clear();
    }

    /// Drop memoized entries whose TTL has passed
    pub fn evict_expired(&self) -> usize {
        self.inner.lock().cache.evict_expired()
    }

    /// Number of live entries, in-flight loads included
    pub fn cached_count(&self) -> usize {
        let state = self.inner.lock();
        state.cache.len() + state.in_flight.len()
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

impl<K: Hash + Eq, V> LoaderState<K, V> {
    fn lookup(&mut self, key: &K) -> Option<Coalesced<V>> {
        if let Some(pending) = self.in_flight.get(key) {
            return Some(pending.shared.clone());
        }
        self.cache.get(key).cloned()
    }

    /// Retire load `id` for `key`, returning its future unless the key was
    /// cleared or reloaded in the meantime.
    fn finish(&mut self, key: &K, id: u64) -> Option<Coalesced<V>> {
        if self.in_flight.get(key).is_some_and(|pending| pending.id == id) {
            self.in_flight.remove(key).map(|pending| pending.shared)
        } else {
            None
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, LoaderState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the collection window to close, then dispatch the queue.
    async fn dispatch_queued(self: Arc<Self>) {
        // Let the loading task finish its turn before collecting
        tokio::task::yield_now().await;

        if let Some(window) = self.config.window() {
            let mut seen = self.lock().next_id;
            for _ in 0..MAX_WINDOW_PERIODS {
                self.clock.sleep(window).await;
                let arrived = self.lock().next_id;
                if arrived == seen {
                    break;
                }
                seen = arrived;
            }
        }

        let batch = {
            let mut state = self.lock();
            state.dispatch_scheduled = false;
            std::mem::take(&mut state.queue)
        };

        // A size-triggered dispatch may already have taken the queue
        if !batch.is_empty() {
            self.run_batch(batch).await;
        }
    }

    async fn run_batch(self: Arc<Self>, batch: Vec<PendingLoad<K, V>>) {
        let size = batch.len();
        let keys: Vec<K> = batch.iter().map(|pending| pending.key.clone()).collect();

        self.metrics.record_batch(size);
        debug!(size, "Dispatching load batch");

        let load = Arc::clone(&self.batch_load_fn);
        let outcome = AssertUnwindSafe(async move { load(keys).await }).catch_unwind().await;

        let results: Vec<CoordinationResult<V>> = match outcome {
            Ok(Ok(values)) if values.len() == size => values.into_iter().map(Ok).collect(),
            Ok(Ok(values)) => {
                self.metrics.record_contract_violation();
                warn!(expected = size, actual = values.len(), "Batch load function broke result contract");
                vec![Err(CoordinationError::contract(size, values.len())); size]
            }
            Ok(Err(e)) => {
                let err = CoordinationError::executor(e);
                debug!(size, error = %err, "Batch load failed");
                vec![Err(err); size]
            }
            Err(_) => {
                warn!(size, "Batch load function panicked");
                vec![Err(CoordinationError::cancelled(CancelReason::Abandoned)); size]
            }
        };

        // Retire in-flight entries before settling so a caller that
        // observes a failure can immediately retry.
        let settled: Vec<(Settler<V>, CoordinationResult<V>)> = {
            let mut state = self.lock();
            batch
                .into_iter()
                .zip(results)
                .map(|(pending, result)| {
                    if let Some(shared) = state.finish(&pending.key, pending.id) {
                        if result.is_ok() && self.config.cache {
                            state.cache.insert(pending.key, shared);
                        }
                    }
                    (pending.settler, result)
                })
                .collect()
        };

        for (settler, result) in settled {
            settle(settler, result);
        }
    }
}
