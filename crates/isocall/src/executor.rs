//! # Call Executors
//!
//! The one seam between the public worker handle and whatever actually runs the
//! callable. A [`Dispatcher`](crate::dispatcher::Dispatcher) forwards calls to an
//! isolate; a [`FallbackExecutor`](crate::fallback::FallbackExecutor) runs them in
//! the caller's task. The choice is made once, when the worker is created.

use std::sync::Arc;

use serde_json::Value;

use crate::channel::Channel;
use crate::pending::PendingCall;

pub trait CallExecutor: Send + Sync + 'static {
    /// Starts a call. Never blocks and never panics; every failure is
    /// reported through the returned future.
    fn invoke(&self, args: Vec<Value>) -> PendingCall;

    /// Shuts the executor down. Safe to call any number of times.
    fn terminate(&self);

    /// The live channel, if there is one.
    fn channel_handle(&self) -> Option<Arc<dyn Channel>>;

    /// Whether calls run in the caller's task rather than on an isolate.
    fn is_fallback(&self) -> bool {
        false
    }
}
