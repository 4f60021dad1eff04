//! Batching and deduplication effectiveness counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Passive observer shared by coordinators through an `Arc`.
#[derive(Debug, Default)]
pub struct CoordinationMetrics {
    /// Requests routed through the batcher, deduplicator or loader
    pub total_requests: AtomicU64,

    /// Requests that were delivered as part of a flushed batch
    pub batched_requests: AtomicU64,

    /// Downstream batch calls issued
    pub total_batches: AtomicU64,

    /// Requests that joined an already in-flight operation
    pub deduplicated_requests: AtomicU64,

    /// Tasks submitted to the scheduler. Kept apart from `total_requests`
    /// since scheduling never folds requests together.
    pub scheduled_tasks: AtomicU64,

    /// Requests settled by `clear()`
    pub cancelled_requests: AtomicU64,

    /// Requests rejected by the watchdog
    pub timed_out_requests: AtomicU64,

    /// Requests rejected because the waiting queue was full
    pub rejected_requests: AtomicU64,

    /// Executor responses with a mismatched result count
    pub contract_violations: AtomicU64,

    /// Largest batch flushed so far
    pub max_batch_size: AtomicU64,
}

impl CoordinationMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering a coordinator
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch flushed downstream
    pub fn record_batch(&self, size: usize) {
        let size = size as u64;
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.batched_requests.fetch_add(size, Ordering::Relaxed);
        self.max_batch_size.fetch_max(size, Ordering::Relaxed);
    }

    /// Record a request coalesced into an in-flight operation
    pub fn record_deduplication(&self) {
        self.deduplicated_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self) {
        self.scheduled_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: usize) {
        self.cancelled_requests.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics with derived rates
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let batched_requests = self.batched_requests.load(Ordering::Relaxed);
        let total_batches = self.total_batches.load(Ordering::Relaxed);
        let deduplicated_requests = self.deduplicated_requests.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests,
            batched_requests,
            total_batches,
            deduplicated_requests,
            scheduled_tasks: self.scheduled_tasks.load(Ordering::Relaxed),
            cancelled_requests: self.cancelled_requests.load(Ordering::Relaxed),
            timed_out_requests: self.timed_out_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            contract_violations: self.contract_violations.load(Ordering::Relaxed),
            max_batch_size: self.max_batch_size.load(Ordering::Relaxed),
            batching_rate: ratio(batched_requests, total_requests),
            deduplication_rate: ratio(deduplicated_requests, total_requests),
            requests_saved: total_requests.saturating_sub(total_batches),
            avg_batch_size: ratio(batched_requests, total_batches),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.batched_requests.store(0, Ordering::Relaxed);
        self.total_batches.store(0, Ordering::Relaxed);
        self.deduplicated_requests.store(0, Ordering::Relaxed);
        self.scheduled_tasks.store(0, Ordering::Relaxed);
        self.cancelled_requests.store(0, Ordering::Relaxed);
        self.timed_out_requests.store(0, Ordering::Relaxed);
        self.rejected_requests.store(0, Ordering::Relaxed);
        self.contract_violations.store(0, Ordering::Relaxed);
        self.max_batch_size.store(0, Ordering::Relaxed);
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Snapshot of coordination metrics at a point in time
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub batched_requests: u64,
    pub total_batches: u64,
    pub deduplicated_requests: u64,
    pub scheduled_tasks: u64,
    pub cancelled_requests: u64,
    pub timed_out_requests: u64,
    pub rejected_requests: u64,
    pub contract_violations: u64,
    pub max_batch_size: u64,
    /// `batched_requests / total_requests` (0.0 - 1.0)
    pub batching_rate: f64,
    /// `deduplicated_requests / total_requests` (0.0 - 1.0)
    pub deduplication_rate: f64,
    /// `total_requests - total_batches`
    pub requests_saved: u64,
    pub avg_batch_size: f64,
}
