//! Configuration for the keyed loader.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the keyed loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Keep settled values memoized (default: true).
    /// When false, entries live only while their load is in flight.
    pub cache: bool,

    /// Maximum number of memoized keys, evicted least recently used first.
    /// `None` leaves the cache unbounded.
    pub cache_capacity: Option<usize>,

    /// Time-to-live for memoized entries in seconds. `None` never expires.
    pub cache_ttl_secs: Option<u64>,

    /// Maximum keys per `batch_load_fn` call. A collection window holding
    /// more keys is split into several calls. `None` means no limit.
    pub max_batch_size: Option<usize>,

    /// Collection window in milliseconds (default: 1). The window closes
    /// once no new key has been queued for this long. With 0 the window is
    /// a single scheduler turn, which only merges reliably on a
    /// current-thread runtime.
    pub window_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache: true,
            cache_capacity: None,
            cache_ttl_secs: None,
            max_batch_size: None,
            window_ms: 1,
        }
    }
}

impl LoaderConfig {
    /// Create config optimized for low latency: small dispatches, short-lived cache
    pub fn low_latency() -> Self {
        Self {
            cache: true,
            cache_capacity: Some(1_000),
            cache_ttl_secs: Some(60),
            max_batch_size: Some(25),
            window_ms: 1,
        }
    }

    /// Create config optimized for high throughput: large dispatches, large cache
    pub fn high_throughput() -> Self {
        Self {
            cache: true,
            cache_capacity: Some(100_000),
            cache_ttl_secs: Some(3600),
            max_batch_size: Some(500),
            window_ms: 5,
        }
    }

    /// Memoize only in-flight loads
    pub fn without_cache() -> Self {
        Self { cache: false, ..Self::default() }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REQFLOW_LOADER_CACHE") {
            config.cache = val == "1" || val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("REQFLOW_LOADER_CACHE_SIZE") {
            if let Ok(n) = val.parse() {
                config.cache_capacity = Some(n);
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_LOADER_CACHE_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.cache_ttl_secs = Some(n);
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_LOADER_MAX_BATCH") {
            if let Ok(n) = val.parse() {
                config.max_batch_size = Some(n);
            }
        }

        if let Ok(val) = std::env::var("REQFLOW_LOADER_WINDOW_MS") {
            if let Ok(n) = val.parse() {
                config.window_ms = n;
            }
        }

        config
    }

    /// Get the collection window as Duration (`None` for a single turn)
    pub fn window(&self) -> Option<Duration> {
        (self.window_ms > 0).then(|| Duration::from_millis(self.window_ms))
    }

    /// Get the cache TTL as Duration
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Dispatch size limit, never below one
    pub fn effective_max_batch_size(&self) -> Option<usize> {
        self.max_batch_size.map(|n| n.max(1))
    }
}
