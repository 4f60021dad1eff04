//! Metrics for the coordination layer.
//!
//! [`CoordinationMetrics`] is a passive observer: coordinators call its
//! `record_*` methods, and [`CoordinationMetrics::snapshot`] derives the
//! batching rate, deduplication rate and requests saved. The optional
//! [`CoordinationCollector`] exposes the same counters to Prometheus.

mod coordination;
mod exporter;

pub use self::coordination::{CoordinationMetrics, MetricsSnapshot};
pub use self::exporter::{encode_registry, CoordinationCollector};
