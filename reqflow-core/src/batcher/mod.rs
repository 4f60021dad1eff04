//! Keyed request batching.
//!
//! # Architecture
//!
//! ```text
//! batch("GET:/a", p1) ─┐
//! batch("GET:/a", p2) ─┼──► Batch "GET:/a" [p1, p2, p3] ──► executor([p1, p2, p3])
//! batch("GET:/a", p3) ─┘        │                                 │
//!                               │ flush on max_batch_size         ▼
//!                               │ or window expiry        [r1, r2, r3] by index
//! batch("GET:/b", q1) ───► Batch "GET:/b" [q1] ──► ...
//! ```
//!
//! # Features
//!
//! - **One batch per key**: at most one open batch and one armed timer per key
//! - **Exactly-once flush**: size threshold or timer, never both
//! - **Index-aligned results**: a wrong-length response is a contract violation
//!   delivered to every caller of the batch
//! - **No silent drops**: `clear()` settles queued requests with a cancellation

mod config;
mod coordinator;

pub use config::BatchConfig;
pub use coordinator::{BatchCoordinator, FlushTrigger};
