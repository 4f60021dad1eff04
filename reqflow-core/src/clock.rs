//! Schedulable delay primitive.
//!
//! Batch windows and watchdog deadlines are expressed as `Clock::sleep`
//! calls so that tests can drive them deterministically. Production code
//! uses [`TokioClock`], which also honours `tokio::time::pause`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

/// A source of delays.
pub trait Clock: Send + Sync + 'static {
    /// Return a future that completes once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock shared between coordinators.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Default shared clock.
pub fn tokio_clock() -> SharedClock {
    Arc::new(TokioClock)
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
