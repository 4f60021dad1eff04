//! Aggregate configuration for every coordinator.

use serde::{Deserialize, Serialize};

use crate::batcher::BatchConfig;
use crate::loader::LoaderConfig;
use crate::scheduler::SchedulerConfig;

/// Configuration for a whole coordination scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub batch: BatchConfig,
    pub scheduler: SchedulerConfig,
    pub loader: LoaderConfig,
}

impl CoordinationConfig {
    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            batch: BatchConfig::low_latency(),
            scheduler: SchedulerConfig::low_latency(),
            loader: LoaderConfig::low_latency(),
        }
    }

    /// Create config optimized for high throughput
    pub fn high_throughput() -> Self {
        Self {
            batch: BatchConfig::high_throughput(),
            scheduler: SchedulerConfig::high_throughput(),
            loader: LoaderConfig::high_throughput(),
        }
    }

    /// Create config from `REQFLOW_*` environment variables
    pub fn from_env() -> Self {
        Self {
            batch: BatchConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            loader: LoaderConfig::from_env(),
        }
    }
}
