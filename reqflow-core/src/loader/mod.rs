//! Batch-and-cache loading for point lookups.
//!
//! # Architecture
//!
//! ```text
//! load(1) ──┐                       ┌──► cache[1] = shared future ─┐
//! load(2) ──┼──► same window ───────┼──► cache[2] = shared future ─┼─► batch_load_fn([1, 2, 3])
//! load(3) ──┘                       └──► cache[3] = shared future ─┘          │
//! load(2) ─────► cache hit ──► clone of cache[2]                              ▼
//!                                                     settle 1, 2, 3 by index position
//! ```
//!
//! Each queued key carries the settler for the future recorded as in
//! flight, so dispatch always resolves what was handed out. In-flight
//! entries sit outside the LRU/TTL store and cannot be evicted. On settle,
//! failures are dropped; successes move into the cache when `cache` is
//! enabled, subject to the optional LRU capacity and TTL (counted from
//! settlement).

mod cache;
mod config;
mod keyed;

pub use config::LoaderConfig;
pub use keyed::KeyedLoader;
