//! Error types for the coordination layer.
//!
//! Every coordinator fans a single outcome out to many callers, so the
//! error type is `Clone` and executor failures are wrapped in an `Arc`:
//! all callers that shared an operation receive the *same* underlying
//! error value.
//!
//! # Error Hierarchy
//!
//! ```text
//! CoordinationError
//! ├── Executor          - raised by a supplied executor / task / batch load fn
//! ├── ContractViolation - result array length differs from input length
//! ├── Cancelled         - clear(), watchdog timeout, or an abandoned operation
//! └── QueueOverflow     - waiting list is at its configured bound
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error accepted from executors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used by every coordinator.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// An error produced by a caller-supplied executor, shared by reference.
#[derive(Clone)]
pub struct ExecutorError(Arc<dyn StdError + Send + Sync + 'static>);

impl ExecutorError {
    /// Wrap an executor error.
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(Arc::from(err.into()))
    }

    /// Access the original error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    /// Whether two handles point at the same underlying error value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for ExecutorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Why a pending operation was settled without running to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The owning coordinator's `clear()` was called.
    Cleared,
    /// The watchdog fired before the operation started.
    TimedOut { waited: Duration },
    /// The task driving the operation went away without settling it.
    Abandoned,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cleared => write!(f, "coordinator was cleared"),
            CancelReason::TimedOut { waited } => write!(f, "timed out after {:?} in queue", waited),
            CancelReason::Abandoned => write!(f, "operation was abandoned"),
        }
    }
}

/// Errors delivered to callers of the coordination layer.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// The executor failed; propagated verbatim to every sharing caller
    #[error("Executor failed: {0}")]
    Executor(ExecutorError),

    /// The executor returned the wrong number of results
    #[error("Contract violation: expected {expected} results, executor returned {actual}")]
    ContractViolation { expected: usize, actual: usize },

    /// The operation was cancelled before it produced a value
    #[error("Cancelled: {0}")]
    Cancelled(CancelReason),

    /// The waiting queue is full
    #[error("Queue is full (max: {max})")]
    QueueOverflow { max: usize },
}

impl CoordinationError {
    /// Create an executor error
    pub fn executor(err: impl Into<BoxError>) -> Self {
        Self::Executor(ExecutorError::new(err))
    }

    /// Create a contract violation error
    pub fn contract(expected: usize, actual: usize) -> Self {
        Self::ContractViolation { expected, actual }
    }

    /// Create a cancellation error
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    /// Whether two errors carry the same executor error instance.
    pub fn same_executor_error(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Executor(a), Self::Executor(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}
