//! Explicit wiring for a coordination scope.
//!
//! A [`CoordinationContext`] owns the configuration, clock and metrics that
//! coordinators share. Components built from the same context report into
//! the same counters; separate contexts are fully isolated, which is what
//! tests and multi-tenant hosts need.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use prometheus::Registry;

use crate::batcher::BatchCoordinator;
use crate::clock::{tokio_clock, SharedClock};
use crate::config::CoordinationConfig;
use crate::dedup::Deduplicator;
use crate::error::BoxError;
use crate::loader::KeyedLoader;
use crate::metrics::{CoordinationCollector, CoordinationMetrics, MetricsSnapshot};
use crate::scheduler::PriorityScheduler;

/// Shared collaborators for one coordination scope
#[derive(Clone)]
pub struct CoordinationContext {
    config: CoordinationConfig,
    clock: SharedClock,
    metrics: Arc<CoordinationMetrics>,
}

impl Default for CoordinationContext {
    fn default() -> Self {
        Self::new(CoordinationConfig::default())
    }
}

impl CoordinationContext {
    pub fn new(config: CoordinationConfig) -> Self {
        Self::with_clock(config, tokio_clock())
    }

    /// Create a context whose timers go through `clock`
    pub fn with_clock(config: CoordinationConfig, clock: SharedClock) -> Self {
        Self { config, clock, metrics: Arc::new(CoordinationMetrics::new()) }
    }

    /// Create a context configured from `REQFLOW_*` environment variables
    pub fn from_env() -> Self {
        Self::new(CoordinationConfig::from_env())
    }

    pub fn batch_coordinator<K, P, R>(&self) -> BatchCoordinator<K, P, R>
    where
        K: Hash + Eq + Clone + Debug + Send + 'static,
        P: Send + 'static,
        R: Send + 'static,
    {
        BatchCoordinator::from_parts(
            self.config.batch.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
        )
    }

    pub fn deduplicator<K, T>(&self) -> Deduplicator<K, T>
    where
        K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        Deduplicator::with_metrics(Arc::clone(&self.metrics))
    }

    pub fn scheduler(&self) -> PriorityScheduler {
        PriorityScheduler::from_parts(
            self.config.scheduler.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
        )
    }

    pub fn loader<K, V, F, Fut, E>(&self, batch_load_fn: F) -> KeyedLoader<K, V>
    where
        K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        KeyedLoader::from_parts(
            self.config.loader.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
            batch_load_fn,
        )
    }

    /// Build a Prometheus registry exposing this scope's counters
    pub fn prometheus_registry(&self, namespace: &str) -> prometheus::Result<Registry> {
        CoordinationCollector::registry(Arc::clone(&self.metrics), namespace)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }
}
