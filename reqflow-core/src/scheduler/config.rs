//! Configuration for the priority scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the priority scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once (default: 5)
    pub max_concurrent: usize,

    /// Maximum number of tasks allowed to wait for a slot.
    /// `None` leaves the waiting list unbounded.
    pub max_queue_size: Option<usize>,

    /// Maximum time a task may wait before it is rejected, in milliseconds.
    /// `None` disables the watchdog.
    pub queue_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 5, max_queue_size: None, queue_timeout_ms: None }
    }
}

impl SchedulerConfig {
    /// Create config optimized for low latency: fail fast rather than queue
    pub fn low_latency() -> Self {
        Self { max_concurrent: 8, max_queue_size: Some(64), queue_timeout_ms: Some(500) }
    }

    /// Create config optimized for high throughput: wide and deep
    pub fn high_throughput() -> Self {
        Self { max_concurrent: 32, max_queue_size: Some(10_000), queue_timeout_ms: None }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REQFLOW_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.max_concurrent = n;
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_MAX_QUEUE") {
            if let Ok(n) = val.parse() {
                config.max_queue_size = Some(n);
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_QUEUE_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.queue_timeout_ms = Some(n);
            }
        }

        config
    }

    /// Concurrency bound, never below one
    pub fn effective_max_concurrent(&self) -> usize {
        self.max_concurrent.max(1)
    }

    /// Get the watchdog bound as Duration
    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }
}
