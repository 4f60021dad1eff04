// Reqflow Benchmarking Library
//
// Synthetic workloads measuring how much downstream traffic the
// coordination layer saves against a simulated backend

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use reqflow_core::{CoordinationConfig, CoordinationContext, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which coordinator a scenario drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Many `batch()` calls over a few keys
    BurstSameKey,
    /// Concurrent `deduplicate()` calls over a few hot keys
    HotKeyDedup,
    /// Tasks with mixed priorities through the scheduler
    PriorityMix,
    /// Point lookups through the keyed loader
    PointLookups,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub kind: ScenarioKind,
    pub requests: u32,
    pub distinct_keys: u32,
    pub backend_latency_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub config: ScenarioConfig,
    /// Calls that reached the simulated backend
    pub downstream_calls: u64,
    pub total_time_ms: f64,
    pub requests_per_second: f64,
    pub metrics: MetricsSnapshot,
    pub timestamp: String,
}

/// Backend that answers every key with `key * 2` after a fixed latency
/// and counts how often it was called.
pub struct SimulatedBackend {
    latency: Duration,
    calls: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self { latency, calls: AtomicU64::new(0) })
    }

    pub async fn fetch_one(&self, key: u64) -> anyhow::Result<u64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        Ok(key * 2)
    }

    pub async fn fetch_many(&self, keys: Vec<u64>) -> anyhow::Result<Vec<u64>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        Ok(keys.into_iter().map(|key| key * 2).collect())
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

pub struct ScenarioRunner {
    coordination: CoordinationConfig,
}

impl ScenarioRunner {
    pub fn new(coordination: CoordinationConfig) -> Self {
        Self { coordination }
    }

    /// Run a single scenario against a fresh backend and coordination scope
    pub async fn run(&self, config: &ScenarioConfig) -> anyhow::Result<ScenarioResult> {
        if config.distinct_keys == 0 {
            anyhow::bail!("Scenario '{}' needs at least one distinct key", config.name);
        }

        let ctx = CoordinationContext::new(self.coordination.clone());
        let backend = SimulatedBackend::new(Duration::from_millis(config.backend_latency_ms));

        info!(scenario = %config.name, requests = config.requests, "Running scenario");
        let start = Instant::now();

        match config.kind {
            ScenarioKind::BurstSameKey => run_burst(&ctx, &backend, config).await?,
            ScenarioKind::HotKeyDedup => run_hot_keys(&ctx, &backend, config).await?,
            ScenarioKind::PriorityMix => run_priority_mix(&ctx, &backend, config).await?,
            ScenarioKind::PointLookups => run_point_lookups(&ctx, &backend, config).await?,
        }

        let elapsed = start.elapsed();
        let total_time_ms = elapsed.as_secs_f64() * 1000.0;
        let requests_per_second = if elapsed.as_secs_f64() > 0.0 {
            config.requests as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        Ok(ScenarioResult {
            config: config.clone(),
            downstream_calls: backend.call_count(),
            total_time_ms,
            requests_per_second,
            metrics: ctx.snapshot(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

fn key_for(config: &ScenarioConfig, i: u32) -> u64 {
    u64::from(i % config.distinct_keys)
}

/// Every result must equal `expected * 2`
fn check(name: &str, expected: u64, actual: u64) -> anyhow::Result<()> {
    if actual != expected * 2 {
        anyhow::bail!("Scenario '{}' returned {} for input {}", name, actual, expected);
    }
    Ok(())
}

async fn run_burst(
    ctx: &CoordinationContext,
    backend: &Arc<SimulatedBackend>,
    config: &ScenarioConfig,
) -> anyhow::Result<()> {
    let batcher = ctx.batch_coordinator::<String, u64, u64>();

    let handles: Vec<_> = (0..config.requests)
        .map(|i| {
            let key = format!("GET:/items/{}", key_for(config, i));
            let backend = Arc::clone(backend);
            let payload = u64::from(i);
            let handle = batcher.batch(key, payload, move |payloads| async move {
                backend.fetch_many(payloads).await
            });
            (payload, handle)
        })
        .collect();

    for (payload, handle) in handles {
        let value = handle.await.context("Batched request failed")?;
        check(&config.name, payload, value)?;
    }
    Ok(())
}

async fn run_hot_keys(
    ctx: &CoordinationContext,
    backend: &Arc<SimulatedBackend>,
    config: &ScenarioConfig,
) -> anyhow::Result<()> {
    let dedup = ctx.deduplicator::<u64, u64>();

    let futures: Vec<_> = (0..config.requests)
        .map(|i| {
            let key = key_for(config, i);
            let backend = Arc::clone(backend);
            let fut = dedup.deduplicate(key, move || async move { backend.fetch_one(key).await });
            (key, fut)
        })
        .collect();

    for (key, fut) in futures {
        let value = fut.await.context("Deduplicated request failed")?;
        check(&config.name, key, value)?;
    }
    Ok(())
}

async fn run_priority_mix(
    ctx: &CoordinationContext,
    backend: &Arc<SimulatedBackend>,
    config: &ScenarioConfig,
) -> anyhow::Result<()> {
    let scheduler = ctx.scheduler();

    let handles: Vec<_> = (0..config.requests)
        .map(|i| {
            let key = key_for(config, i);
            let backend = Arc::clone(backend);
            let priority = (i % 3) as i32;
            let handle = scheduler
                .enqueue_with_priority(move || async move { backend.fetch_one(key).await }, priority);
            (key, handle)
        })
        .collect();

    for (key, handle) in handles {
        let value = handle.await.context("Scheduled task failed")?;
        check(&config.name, key, value)?;
    }
    Ok(())
}

async fn run_point_lookups(
    ctx: &CoordinationContext,
    backend: &Arc<SimulatedBackend>,
    config: &ScenarioConfig,
) -> anyhow::Result<()> {
    let loader_backend = Arc::clone(backend);
    let loader = ctx.loader(move |keys: Vec<u64>| {
        let backend = Arc::clone(&loader_backend);
        async move { backend.fetch_many(keys).await }
    });

    let keys: Vec<u64> = (0..config.requests).map(|i| key_for(config, i)).collect();
    let values = join_all(keys.iter().map(|&key| loader.load(key)).collect::<Vec<_>>()).await;

    for (key, value) in keys.into_iter().zip(values) {
        let value = value.context("Keyed load failed")?;
        check(&config.name, key, value)?;
    }
    Ok(())
}

/// Get standard scenario configurations
pub fn get_standard_scenarios() -> Vec<ScenarioConfig> {
    vec![
        ScenarioConfig {
            name: "burst_same_key".to_string(),
            kind: ScenarioKind::BurstSameKey,
            requests: 100,
            distinct_keys: 2,
            backend_latency_ms: 20,
        },
        ScenarioConfig {
            name: "hot_key_dedup".to_string(),
            kind: ScenarioKind::HotKeyDedup,
            requests: 100,
            distinct_keys: 5,
            backend_latency_ms: 20,
        },
        ScenarioConfig {
            name: "priority_mix".to_string(),
            kind: ScenarioKind::PriorityMix,
            requests: 30,
            distinct_keys: 30,
            backend_latency_ms: 10,
        },
        ScenarioConfig {
            name: "point_lookups".to_string(),
            kind: ScenarioKind::PointLookups,
            requests: 200,
            distinct_keys: 50,
            backend_latency_ms: 20,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(kind: ScenarioKind, requests: u32, distinct_keys: u32) -> ScenarioConfig {
        ScenarioConfig {
            name: "test".to_string(),
            kind,
            requests,
            distinct_keys,
            backend_latency_ms: 10,
        }
    }

    #[test]
    fn test_standard_scenarios() {
        let scenarios = get_standard_scenarios();
        assert_eq!(scenarios.len(), 4);
        assert_eq!(scenarios[0].name, "burst_same_key");
        assert_eq!(scenarios[3].kind, ScenarioKind::PointLookups);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ScenarioKind::HotKeyDedup).unwrap();
        assert_eq!(json, "\"hot_key_dedup\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_batches_by_size() {
        let runner = ScenarioRunner::new(CoordinationConfig::default());
        let result = runner.run(&scenario(ScenarioKind::BurstSameKey, 20, 1)).await.unwrap();

        assert_eq!(result.downstream_calls, 2);
        assert_eq!(result.metrics.total_requests, 20);
        assert_eq!(result.metrics.requests_saved, 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_keys_are_deduplicated() {
        let runner = ScenarioRunner::new(CoordinationConfig::default());
        let result = runner.run(&scenario(ScenarioKind::HotKeyDedup, 20, 2)).await.unwrap();

        assert_eq!(result.downstream_calls, 2);
        assert_eq!(result.metrics.deduplicated_requests, 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_mix_runs_every_task() {
        let runner = ScenarioRunner::new(CoordinationConfig::default());
        let result = runner.run(&scenario(ScenarioKind::PriorityMix, 12, 12)).await.unwrap();

        assert_eq!(result.downstream_calls, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_point_lookups_collapse_into_one_call() {
        let runner = ScenarioRunner::new(CoordinationConfig::default());
        let result = runner.run(&scenario(ScenarioKind::PointLookups, 40, 8)).await.unwrap();

        assert_eq!(result.downstream_calls, 1);
        assert_eq!(result.metrics.batched_requests, 8);
    }

    #[tokio::test]
    async fn test_zero_keys_is_rejected() {
        let runner = ScenarioRunner::new(CoordinationConfig::default());
        assert!(runner.run(&scenario(ScenarioKind::HotKeyDedup, 5, 0)).await.is_err());
    }
}
