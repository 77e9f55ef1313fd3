//! # Fallback Executor
//!
//! Runs the callable in the caller's own task when isolates are unavailable.
//! The public contract is unchanged: calls still return a [`PendingCall`] and
//! fail with the same normalized errors. What is lost is isolation and
//! parallelism, and `terminate` and `channel_handle` have nothing to act on.

use std::sync::Arc;
use std::sync::Mutex;

use futures::FutureExt;
use serde_json::Value;

use crate::bootstrap;
use crate::bootstrap::BootstrapPayload;
use crate::bootstrap::Guest;
use crate::channel::Channel;
use crate::error::Error;
use crate::error::Result;
use crate::executor::CallExecutor;
use crate::pending::PendingCall;

pub struct FallbackExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    payload: BootstrapPayload,
    slot: Mutex<Slot>,
}

/// The callable is loaded on first use and kept for later calls.
enum Slot {
    Unloaded,
    Ready(Guest),
    Failed(Error),
}

impl FallbackExecutor {
    pub fn new(name: impl Into<String>, payload: BootstrapPayload) -> Self {
        let name = name.into();
        tracing::warn!(
            worker = %name,
            "isolates are not supported in this environment; \
             the function will run in the caller's task without isolation or parallelism"
        );

        Self {
            inner: Arc::new(Inner {
                name,
                payload,
                slot: Mutex::new(Slot::Unloaded),
            }),
        }
    }
}

impl CallExecutor for FallbackExecutor {
    fn invoke(&self, args: Vec<Value>) -> PendingCall {
        let inner = self.inner.clone();
        PendingCall::deferred(
            async move {
                // complete asynchronously even though the work is synchronous
                tokio::task::yield_now().await;
                inner.run(&args)
            }
            .boxed(),
        )
    }

    fn terminate(&self) {
        tracing::warn!(worker = %self.inner.name, "terminate() called on a fallback worker; no action taken");
    }

    fn channel_handle(&self) -> Option<Arc<dyn Channel>> {
        tracing::warn!(worker = %self.inner.name, "channel_handle() called on a fallback worker; no channel exists");
        None
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

impl Inner {
    fn run(&self, args: &[Value]) -> Result<Value> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::channel_fault("fallback worker poisoned by an earlier panic"))?;

        if matches!(*slot, Slot::Unloaded) {
            *slot = self.load();
        }

        match &mut *slot {
            Slot::Ready(guest) => guest.invoke(args).map_err(Error::from_call_failure),
            Slot::Failed(error) => Err(error.clone()),
            Slot::Unloaded => Err(Error::channel_unavailable()),
        }
    }

    fn load(&self) -> Slot {
        let engine = match bootstrap::engine(false) {
            Ok(engine) => engine,
            Err(e) => return Slot::Failed(Error::channel_fault(format!("failed to create engine: {:#}", e))),
        };

        match Guest::load(&engine, &self.payload) {
            Ok(guest) => Slot::Ready(guest),
            Err(descriptor) => {
                tracing::error!(worker = %self.name, kind = %descriptor.kind, "fallback worker failed to initialize: {}", descriptor.message);
                Slot::Failed(Error::from_init_failure(descriptor))
            }
        }
    }
}
