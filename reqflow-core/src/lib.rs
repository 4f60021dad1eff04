//! Reqflow Core Library
//!
//! Request coordination primitives for services that fan out many small
//! asynchronous calls to a downstream backend:
//!
//! - [`BatchCoordinator`]: groups requests sharing a key into one executor
//!   call, bounded by a collection window or a size threshold
//! - [`Deduplicator`]: coalesces concurrent identical operations
//! - [`PriorityScheduler`]: bounded-concurrency execution ordered by priority
//! - [`KeyedLoader`]: batch-and-cache loading for point lookups
//! - [`CoordinationMetrics`]: batching and deduplication effectiveness
//!
//! Components are plain values; build them directly or through a
//! [`CoordinationContext`] so they share one metrics instance and clock.
//!
//! # Example
//! ```no_run
//! use reqflow_core::{BoxError, CoordinationContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = CoordinationContext::default();
//!     let batcher = ctx.batch_coordinator::<String, u32, u32>();
//!
//!     let a = batcher.batch("GET:/a".to_string(), 1, |xs: Vec<u32>| async move {
//!         Ok::<_, BoxError>(xs.into_iter().map(|x| x * 2).collect::<Vec<u32>>())
//!     });
//!     let b = batcher.batch("GET:/a".to_string(), 2, |xs: Vec<u32>| async move {
//!         Ok::<_, BoxError>(xs)
//!     });
//!
//!     assert_eq!(a.await?, 2);
//!     assert_eq!(b.await?, 4);
//!     println!("{:?}", ctx.snapshot());
//!     Ok(())
//! }
//! ```

pub mod batcher;
pub mod clock;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod handle;
pub mod loader;
pub mod metrics;
pub mod scheduler;

pub use batcher::{BatchConfig, BatchCoordinator, FlushTrigger};
pub use clock::{Clock, SharedClock, TokioClock};
pub use config::CoordinationConfig;
pub use context::CoordinationContext;
pub use dedup::{Coalesced, Deduplicator};
pub use error::{BoxError, CancelReason, CoordinationError, CoordinationResult, ExecutorError};
pub use handle::Handle;
pub use loader::{KeyedLoader, LoaderConfig};
pub use metrics::{CoordinationMetrics, MetricsSnapshot};
pub use scheduler::{PriorityScheduler, SchedulerConfig};
