//! Waiting list ordered by priority, then arrival.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::CoordinationError;

/// A type-erased unit of work owned by the scheduler until it starts.
pub(crate) trait Job: Send {
    /// Run the work and settle its caller.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Settle the caller without running the work.
    fn reject(self: Box<Self>, err: CoordinationError);
}

/// A task waiting for a free slot
pub(crate) struct WaitingTask {
    pub priority: i32,
    pub sequence: u64,
    pub enqueued_at: Instant,
    pub job: Box<dyn Job>,
    pub watchdog: Option<AbortHandle>,
}

impl WaitingTask {
    pub fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

impl PartialEq for WaitingTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for WaitingTask {}

impl PartialOrd for WaitingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (earlier arrival) first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Max-heap of waiting tasks keyed by `(priority desc, sequence asc)`
#[derive(Default)]
pub(crate) struct WaitingQueue {
    heap: BinaryHeap<WaitingTask>,
}

impl WaitingQueue {
    pub fn push(&mut self, task: WaitingTask) {
        self.heap.push(task);
    }

    pub fn pop(&mut self) -> Option<WaitingTask> {
        self.heap.pop()
    }

    /// Remove a specific task (watchdog expiry). Linear in queue length.
    pub fn remove(&mut self, sequence: u64) -> Option<WaitingTask> {
        let mut tasks = std::mem::take(&mut self.heap).into_vec();
        let removed = tasks
            .iter()
            .position(|task| task.sequence == sequence)
            .map(|index| tasks.swap_remove(index));
        self.heap = BinaryHeap::from(tasks);
        removed
    }

    /// Remove every task, highest priority first
    pub fn drain_ordered(&mut self) -> Vec<WaitingTask> {
        let mut tasks = Vec::with_capacity(self.heap.len());
        while let Some(task) = self.heap.pop() {
            tasks.push(task);
        }
        tasks
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    struct Noop;

    impl Job for Noop {
        fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
            async {}.boxed()
        }

        fn reject(self: Box<Self>, _err: CoordinationError) {}
    }

    fn task(priority: i32, sequence: u64) -> WaitingTask {
        WaitingTask {
            priority,
            sequence,
            enqueued_at: Instant::now(),
            job: Box::new(Noop),
            watchdog: None,
        }
    }

    fn order(queue: &mut WaitingQueue) -> Vec<u64> {
        queue.drain_ordered().into_iter().map(|t| t.sequence).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = WaitingQueue::default();
        queue.push(task(0, 0));
        queue.push(task(5, 1));
        queue.push(task(0, 2));
        queue.push(task(5, 3));
        queue.push(task(-1, 4));

        assert_eq!(order(&mut queue), vec![1, 3, 0, 2, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_by_sequence() {
        let mut queue = WaitingQueue::default();
        for seq in 0..4 {
            queue.push(task(1, seq));
        }

        assert_eq!(queue.remove(2).map(|t| t.sequence), Some(2));
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(order(&mut queue), vec![0, 1, 3]);
    }
}
