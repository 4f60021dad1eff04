//! Bounded-concurrency task scheduling with priorities.
//!
//! # Architecture
//!
//! ```text
//! enqueue(task, 5) ──┐
//! enqueue(task, 0) ──┼──► WaitingQueue (max-heap on priority, then sequence)
//! enqueue(task, 5) ──┘          │
//!                               │ drain: while running < max_concurrent
//!                               ▼
//!                      ┌──── running slots ────┐
//!                      │ task │ task │ ... │    │ ──► on settle: free slot, drain again
//!                      └───────────────────────┘
//! ```
//!
//! Only waiting tasks are reordered; running tasks are never preempted.
//! Optional bounds: `max_queue_size` rejects with `QueueOverflow`, and
//! `queue_timeout_ms` arms a watchdog that rejects tasks still waiting
//! after that long.

mod config;
mod priority;
mod queue;

pub use config::SchedulerConfig;
pub use priority::PriorityScheduler;
