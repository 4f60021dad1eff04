//! Prometheus export for coordination metrics.
//!
//! Instead of registering process-wide statics, [`CoordinationCollector`]
//! reads an injected [`CoordinationMetrics`] on every scrape, so each
//! coordination scope can be exposed through its own `Registry`.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use super::{CoordinationMetrics, MetricsSnapshot};

const COUNTERS: &[(&str, &str)] = &[
    ("requests_total", "Total requests routed through the coordination layer"),
    ("batched_requests_total", "Requests delivered as part of a flushed batch"),
    ("batches_total", "Downstream batch calls issued"),
    ("deduplicated_requests_total", "Requests coalesced into an in-flight operation"),
    ("scheduled_tasks_total", "Tasks submitted to the priority scheduler"),
    ("cancelled_requests_total", "Pending requests settled by clear()"),
    ("timed_out_requests_total", "Waiting requests rejected by the watchdog"),
    ("rejected_requests_total", "Requests rejected because the queue was full"),
    ("contract_violations_total", "Executor responses with a mismatched result count"),
];

const GAUGES: &[(&str, &str)] = &[
    ("batching_rate", "Share of requests delivered through batches"),
    ("deduplication_rate", "Share of requests served by an in-flight operation"),
    ("requests_saved", "Requests minus downstream batch calls"),
    ("max_batch_size", "Largest batch flushed"),
];

/// Prometheus collector over a shared [`CoordinationMetrics`].
pub struct CoordinationCollector {
    metrics: Arc<CoordinationMetrics>,
    namespace: String,
    descs: Vec<Desc>,
}

impl CoordinationCollector {
    /// Create a collector publishing under `namespace` (e.g. `"reqflow"`).
    pub fn new(metrics: Arc<CoordinationMetrics>, namespace: &str) -> prometheus::Result<Self> {
        let mut descs = Vec::with_capacity(COUNTERS.len() + GAUGES.len());
        for (name, help) in COUNTERS {
            let counter = IntCounter::with_opts(opts(namespace, name, help))?;
            descs.extend(counter.desc().into_iter().cloned());
        }
        for (name, help) in GAUGES {
            let gauge = Gauge::with_opts(opts(namespace, name, help))?;
            descs.extend(gauge.desc().into_iter().cloned());
        }

        Ok(Self { metrics, namespace: namespace.to_string(), descs })
    }

    /// Create a registry with this collector already registered.
    pub fn registry(metrics: Arc<CoordinationMetrics>, namespace: &str) -> prometheus::Result<Registry> {
        let registry = Registry::new();
        registry.register(Box::new(Self::new(metrics, namespace)?))?;
        Ok(registry)
    }

    fn counter_values(snapshot: &MetricsSnapshot) -> [u64; 9] {
        [
            snapshot.total_requests,
            snapshot.batched_requests,
            snapshot.total_batches,
            snapshot.deduplicated_requests,
            snapshot.scheduled_tasks,
            snapshot.cancelled_requests,
            snapshot.timed_out_requests,
            snapshot.rejected_requests,
            snapshot.contract_violations,
        ]
    }

    fn gauge_values(snapshot: &MetricsSnapshot) -> [f64; 4] {
        [
            snapshot.batching_rate,
            snapshot.deduplication_rate,
            snapshot.requests_saved as f64,
            snapshot.max_batch_size as f64,
        ]
    }
}

impl Collector for CoordinationCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.metrics.snapshot();
        let mut families = Vec::with_capacity(self.descs.len());

        for ((name, help), value) in COUNTERS.iter().zip(Self::counter_values(&snapshot)) {
            if let Ok(counter) = IntCounter::with_opts(opts(&self.namespace, name, help)) {
                counter.inc_by(value);
                families.extend(counter.collect());
            }
        }
        for ((name, help), value) in GAUGES.iter().zip(Self::gauge_values(&snapshot)) {
            if *name == "max_batch_size" {
                if let Ok(gauge) = IntGauge::with_opts(opts(&self.namespace, name, help)) {
                    gauge.set(value as i64);
                    families.extend(gauge.collect());
                }
            } else if let Ok(gauge) = Gauge::with_opts(opts(&self.namespace, name, help)) {
                gauge.set(value);
                families.extend(gauge.collect());
            }
        }

        families
    }
}

fn opts(namespace: &str, name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(namespace)
}

/// Encode a registry to Prometheus text format.
pub fn encode_registry(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&registry.gather())
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}
