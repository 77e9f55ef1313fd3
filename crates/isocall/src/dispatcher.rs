//! # Dispatcher
//!
//! Turns a fire-and-forget [`Channel`] into call/return.
//!
//! Each call gets a fresh id and an entry in the pending-call table before its
//! request is posted. A background pump reads the channel and settles the entry
//! whose id the answer carries. Failures that belong to no single call (the
//! isolate failed to start, the channel faulted, the owner terminated) settle
//! every entry at once and dispose the channel.
//!
//! ## Invariants
//!
//! - Every entry in the table is a posted request still waiting for its answer.
//! - Ids come from a per-dispatcher counter and are never reused.
//! - Each entry is settled exactly once: whoever removes it from the table
//!   settles it.
//! - Once `disposed` is set it is never cleared, and the channel is disposed
//!   exactly once.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use isowire::Request;

use crate::channel::Channel;
use crate::channel::ChannelEvent;
use crate::error::Error;
use crate::executor::CallExecutor;
use crate::pending::PendingCall;
use crate::pending::Settle;

/// Correlates calls with answers over one isolate channel.
///
/// Must be created inside a tokio runtime: construction spawns the pump task.
/// Dropping the dispatcher terminates it.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    channel: Arc<dyn Channel>,
    pending: DashMap<String, Settle>,
    seq_gen: AtomicU64,
    /// No further calls may be registered.
    disposed: AtomicBool,
    /// The channel has been disposed.
    released: AtomicBool,
}

impl Dispatcher {
    /// Takes ownership of the channel and spawns the pump task.
    pub fn new(name: impl Into<String>, channel: Box<dyn Channel>) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            channel: Arc::from(channel),
            pending: DashMap::new(),
            seq_gen: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });

        let pump = shared.clone();
        tokio::spawn(async move { pump.run().await });

        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers a call and posts its request.
    pub fn dispatch(&self, args: Vec<Value>) -> PendingCall {
        self.shared.dispatch(args)
    }

    /// Number of calls still waiting for an answer.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether the channel has been given up, by fault or by termination.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Fails every pending call with `Terminated` and disposes the channel.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// The live channel, or `None` once disposed.
    pub fn channel_handle(&self) -> Option<Arc<dyn Channel>> {
        if self.is_disposed() {
            return None;
        }
        Some(self.shared.channel.clone())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.terminate();
    }
}

impl CallExecutor for Dispatcher {
    fn invoke(&self, args: Vec<Value>) -> PendingCall {
        self.dispatch(args)
    }

    fn terminate(&self) {
        Dispatcher::terminate(self);
    }

    fn channel_handle(&self) -> Option<Arc<dyn Channel>> {
        Dispatcher::channel_handle(self)
    }
}

impl Shared {
    fn dispatch(&self, args: Vec<Value>) -> PendingCall {
        if self.disposed.load(Ordering::SeqCst) {
            return PendingCall::failed(Error::channel_unavailable());
        }

        let id = format!("call-{}", self.seq_gen.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        // a broadcast may have drained the table between the check and the insert
        if self.disposed.load(Ordering::SeqCst) {
            return match self.pending.remove(&id) {
                Some(_) => PendingCall::failed(Error::channel_unavailable()),
                None => PendingCall::waiting(rx),
            };
        }

        let posted = isowire::encode_request(&Request::new(id.clone(), args))
            .map_err(Error::send_failure)
            .and_then(|payload| self.channel.send(&payload).map_err(Error::send_failure));

        match posted {
            Ok(()) => {
                tracing::trace!(worker = %self.name, id = %id, "posted call");
                PendingCall::waiting(rx)
            }
            Err(error) => match self.pending.remove(&id) {
                Some(_) => {
                    tracing::debug!(worker = %self.name, id = %id, %error, "send failed");
                    PendingCall::failed(error)
                }
                // already settled by a broadcast that raced the send
                None => PendingCall::waiting(rx),
            },
        }
    }

    /// Reads the channel until it closes or the dispatcher is disposed.
    async fn run(self: Arc<Self>) {
        loop {
            match self.channel.recv().await {
                Some(ChannelEvent::Message(bytes)) => self.handle_message(&bytes),
                Some(ChannelEvent::Fault(message)) => {
                    self.broadcast(Error::channel_fault(message));
                }
                None => {
                    if !self.disposed.load(Ordering::SeqCst) {
                        self.broadcast(Error::channel_fault("channel closed unexpectedly"));
                    }
                    break;
                }
            }

            if self.disposed.load(Ordering::SeqCst) {
                break;
            }
        }
        tracing::trace!(worker = %self.name, "pump stopped");
    }

    fn handle_message(&self, bytes: &[u8]) {
        let response = match isowire::decode_response(bytes) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(worker = %self.name, error = %e, "dropping malformed message");
                return;
            }
        };

        if response.is_init_failure() {
            let Some(descriptor) = response.error else {
                tracing::warn!(worker = %self.name, "dropping init-error message without an error");
                return;
            };
            self.broadcast(Error::from_init_failure(descriptor));
            return;
        }

        // stale, duplicate, or answered after termination
        let Some((id, settle)) = self.pending.remove(&response.id) else {
            tracing::debug!(worker = %self.name, id = %response.id, "discarding answer for unknown call");
            return;
        };

        tracing::trace!(worker = %self.name, id = %id, "received answer");
        let outcome = response.into_outcome().map_err(Error::from_call_failure);

        // receiver dropped means the caller stopped listening
        let _ = settle.send(outcome);
    }

    /// Settles every pending call with `error` and disposes the channel.
    ///
    /// Only the first broadcast has an effect; returns whether this was it.
    fn broadcast(&self, error: Error) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            tracing::debug!(worker = %self.name, %error, "ignoring fault after disposal");
            return false;
        }

        tracing::error!(
            worker = %self.name,
            kind = %error.kind(),
            pending = self.pending.len(),
            "isolate failed: {}",
            error,
        );
        self.settle_all(&error);
        self.release();
        true
    }

    fn terminate(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.settle_all(&Error::terminated());
        self.release();
    }

    fn settle_all(&self, error: &Error) {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, settle)) = self.pending.remove(&id) {
                let _ = settle.send(Err(error.clone()));
            }
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(worker = %self.name, "disposing channel");
        self.channel.dispose();
    }
}
