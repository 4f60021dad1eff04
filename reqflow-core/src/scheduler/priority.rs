//! Bounded-concurrency priority scheduler.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::SchedulerConfig;
use super::queue::{Job, WaitingQueue, WaitingTask};
use crate::clock::{tokio_clock, SharedClock};
use crate::error::{BoxError, CancelReason, CoordinationError};
use crate::handle::{settle, Handle, Settler};
use crate::metrics::CoordinationMetrics;

type BoxedTask<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, BoxError>> + Send>;

struct TaskJob<T> {
    task: BoxedTask<T>,
    settler: Settler<T>,
}

impl<T: Send + 'static> Job for TaskJob<T> {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let TaskJob { task, settler } = *self;
        async move {
            let result = task().await.map_err(CoordinationError::executor);
            settle(settler, result);
        }
        .boxed()
    }

    fn reject(self: Box<Self>, err: CoordinationError) {
        settle(self.settler, Err(err));
    }
}

struct SchedulerState {
    queue: WaitingQueue,
    running: usize,
    next_sequence: u64,
    drain_scheduled: bool,
}

struct Inner {
    config: SchedulerConfig,
    clock: SharedClock,
    metrics: Arc<CoordinationMetrics>,
    state: Mutex<SchedulerState>,
}

/// Runs submitted tasks with at most `max_concurrent` in flight, starting
/// waiting tasks by priority (higher first) and then arrival order.
///
/// Running tasks are never preempted. Cloning yields another handle to the
/// same scheduler.
#[derive(Clone)]
pub struct PriorityScheduler {
    inner: Arc<Inner>,
}

impl PriorityScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::from_parts(config, tokio_clock(), Arc::new(CoordinationMetrics::new()))
    }

    pub fn from_parts(
        config: SchedulerConfig,
        clock: SharedClock,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                metrics,
                state: Mutex::new(SchedulerState {
                    queue: WaitingQueue::default(),
                    running: 0,
                    next_sequence: 0,
                    drain_scheduled: false,
                }),
            }),
        }
    }

    /// Enqueue `task` with the default priority (0).
    pub fn enqueue<F, Fut, T, E>(&self, task: F) -> Handle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError>,
    {
        self.enqueue_with_priority(task, 0)
    }

    /// Enqueue `task`; never blocks.
    ///
    /// The task joins the waiting list before this returns. Waiting tasks
    /// are started on the next scheduler turn, so on a current-thread
    /// runtime a burst of enqueues made without yielding is started in
    /// priority order. On a multi-thread runtime the drain may run on
    /// another worker mid-burst and start early arrivals while slots are
    /// free. Ordering among tasks that wait for a slot holds on any runtime.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue_with_priority<F, Fut, T, E>(&self, task: F, priority: i32) -> Handle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError>,
    {
        self.inner.metrics.record_scheduled();
        let max_concurrent = self.inner.config.effective_max_concurrent();

        let mut state = self.inner.lock();

        if let Some(max) = self.inner.config.max_queue_size {
            let free_slots = max_concurrent.saturating_sub(state.running);
            if state.queue.len() >= max + free_slots {
                drop(state);
                self.inner.metrics.record_rejected();
                warn!(max, priority, "Scheduler queue full, rejecting task");
                return Handle::settled(Err(CoordinationError::QueueOverflow { max }));
            }
        }

        let (settler, handle) = Handle::channel();
        let task: BoxedTask<T> =
            Box::new(move || async move { task().await.map_err(Into::into) }.boxed());

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let watchdog = self.inner.config.queue_timeout().map(|timeout| {
            let sleep = self.inner.clock.sleep(timeout);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                sleep.await;
                inner.expire(sequence);
            })
            .abort_handle()
        });

        state.queue.push(WaitingTask {
            priority,
            sequence,
            enqueued_at: Instant::now(),
            job: Box::new(TaskJob { task, settler }),
            watchdog,
        });

        if !state.drain_scheduled {
            state.drain_scheduled = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain() });
        }

        handle
    }

    /// Reject every waiting (not yet started) task with a cancellation
    /// error. Running tasks are unaffected. Returns the number rejected.
    pub fn clear(&self) -> usize {
        let waiting = self.inner.lock().queue.drain_ordered();
        let cancelled = waiting.len();

        for mut task in waiting {
            task.cancel_watchdog();
            task.job.reject(CoordinationError::cancelled(CancelReason::Cleared));
        }

        if cancelled > 0 {
            self.inner.metrics.record_cancelled(cancelled);
            warn!(cancelled, "Scheduler cleared with waiting tasks");
        }
        cancelled
    }

    /// Configured concurrency bound
    pub fn max_concurrent(&self) -> usize {
        self.inner.config.effective_max_concurrent()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start waiting tasks while slots are free.
    fn drain(self: Arc<Self>) {
        let max_concurrent = self.config.effective_max_concurrent();

        let started: Vec<WaitingTask> = {
            let mut state = self.lock();
            state.drain_scheduled = false;

            let mut started = Vec::new();
            while state.running < max_concurrent {
                let Some(mut task) = state.queue.pop() else { break };
                task.cancel_watchdog();
                state.running += 1;
                started.push(task);
            }
            started
        };

        for task in started {
            debug!(
                priority = task.priority,
                sequence = task.sequence,
                waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
                "Starting task"
            );
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                // A panicking task drops its settler, which reports
                // `Abandoned` to the caller; the slot is still released.
                let _ = AssertUnwindSafe(task.job.run()).catch_unwind().await;
                inner.finish();
            });
        }
    }

    fn finish(self: Arc<Self>) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
        }
        self.drain();
    }

    /// Watchdog expiry: reject the task if it is still waiting.
    fn expire(&self, sequence: u64) {
        let expired = self.lock().queue.remove(sequence);
        if let Some(task) = expired {
            let waited = task.enqueued_at.elapsed();
            self.metrics.record_timeout();
            warn!(priority = task.priority, waited_ms = waited.as_millis() as u64, "Task timed out in queue");
            task.job.reject(CoordinationError::cancelled(CancelReason::TimedOut { waited }));
        }
    }
}
