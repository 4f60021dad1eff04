//! Caller-side future for eagerly registered work.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{CancelReason, CoordinationError, CoordinationResult};

/// Sending half kept by a coordinator for one pending caller.
pub(crate) type Settler<T> = oneshot::Sender<CoordinationResult<T>>;

/// Future resolving to the outcome of a batched or scheduled operation.
///
/// The work is registered when the handle is created; dropping the handle
/// only discards the outcome. If the coordinator drops the operation
/// without settling it the handle resolves to
/// `Cancelled(CancelReason::Abandoned)`.
#[must_use = "the handle resolves to the operation's outcome"]
pub struct Handle<T> {
    rx: oneshot::Receiver<CoordinationResult<T>>,
}

impl<T> Handle<T> {
    pub(crate) fn channel() -> (Settler<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already settled.
    pub(crate) fn settled(result: CoordinationResult<T>) -> Self {
        let (tx, handle) = Self::channel();
        settle(tx, result);
        handle
    }
}

impl<T> Future for Handle<T> {
    type Output = CoordinationResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or(Err(CoordinationError::cancelled(CancelReason::Abandoned)))
        })
    }
}

/// Settle a caller, ignoring callers that stopped listening.
pub(crate) fn settle<T>(tx: Settler<T>, result: CoordinationResult<T>) {
    let _ = tx.send(result);
}
