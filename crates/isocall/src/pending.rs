//! # Pending Calls
//!
//! The caller's side of one call: a future that settles exactly once with the
//! call's result or failure.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::error::Result;

/// Settlement handle held in a dispatcher's pending-call table.
pub(crate) type Settle = oneshot::Sender<Result<Value>>;

/// A call in flight.
///
/// The request has already been posted by the time this value exists; awaiting
/// it only waits for the answer. Dropping it abandons the answer but does not
/// cancel the call.
#[must_use = "a pending call does nothing observable unless awaited"]
pub struct PendingCall {
    state: State,
}

enum State {
    /// Settled before anything was sent.
    Settled(Option<Result<Value>>),
    /// Waiting for the dispatcher to route an answer.
    Waiting(oneshot::Receiver<Result<Value>>),
    /// Runs in the caller's own task when polled.
    Deferred(BoxFuture<'static, Result<Value>>),
}

impl PendingCall {
    pub(crate) fn settled(outcome: Result<Value>) -> Self {
        Self {
            state: State::Settled(Some(outcome)),
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        Self::settled(Err(error))
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            state: State::Waiting(rx),
        }
    }

    pub(crate) fn deferred(fut: BoxFuture<'static, Result<Value>>) -> Self {
        Self {
            state: State::Deferred(fut),
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Settled(outcome) => {
                Poll::Ready(outcome.take().unwrap_or_else(|| Err(Error::channel_unavailable())))
            }
            // a dropped sender means the table went away without settling us
            State::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(Error::terminated()))),
            State::Deferred(fut) => fut.as_mut().poll(cx),
        }
    }
}
