//! Configuration for the batch coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the batch coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Collection window in milliseconds, re-armed by every new request
    /// for the key (default: 50)
    pub batch_delay_ms: u64,

    /// Number of requests that flushes a batch immediately (default: 10)
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_delay_ms: 50, max_batch_size: 10 }
    }
}

impl BatchConfig {
    /// Create config optimized for low latency (small, short windows)
    pub fn low_latency() -> Self {
        Self { batch_delay_ms: 5, max_batch_size: 4 }
    }

    /// Create config optimized for high throughput (large, long windows)
    pub fn high_throughput() -> Self {
        Self { batch_delay_ms: 100, max_batch_size: 50 }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REQFLOW_BATCH_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.batch_delay_ms = n;
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.max_batch_size = n;
            }
        }

        config
    }

    /// Get the collection window as Duration
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Batch size threshold, never below one
    pub fn effective_max_batch_size(&self) -> usize {
        self.max_batch_size.max(1)
    }
}
