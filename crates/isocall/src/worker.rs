//! # Inline Workers
//!
//! The public entry point. [`create_inline_worker`] validates the callable,
//! builds its bootstrap payload and picks an executor: a [`Dispatcher`] over a
//! [`ThreadChannel`] when isolates are available, a [`FallbackExecutor`]
//! otherwise. The returned [`InlineWorker`] looks the same either way.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;

use crate::bootstrap;
use crate::bootstrap::Source;
use crate::capability;
use crate::channel::Channel;
use crate::config::Isolation;
use crate::config::WorkerOptions;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::executor::CallExecutor;
use crate::fallback::FallbackExecutor;
use crate::pending::PendingCall;
use crate::thread_channel::ThreadChannel;

/// First bytes of every binary WebAssembly module.
const WASM_MAGIC: &[u8] = b"\0asm";

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

/// Something that can be called from a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callable {
    /// A module in WebAssembly text format.
    Text(String),
    /// A binary WebAssembly module.
    Binary(Vec<u8>),
    /// A builtin provided by the host. It has no body, so it cannot be shipped
    /// to an isolate.
    Native { name: String },
}

impl From<&str> for Callable {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Callable {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Callable {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Checks a callable before any isolate or channel exists.
fn validate(callable: Callable, options: &WorkerOptions) -> Result<Source> {
    if options.entry.as_deref().is_some_and(|entry| entry.trim().is_empty()) {
        return Err(Error::invalid_argument("`entry` must name an exported function"));
    }

    match callable {
        Callable::Text(text) if text.trim().is_empty() => {
            Err(Error::invalid_argument("the callable's module text is empty"))
        }
        Callable::Text(text) => Ok(Source::Text(text)),
        Callable::Binary(bytes) if !bytes.starts_with(WASM_MAGIC) => Err(Error::invalid_argument(
            "the callable's bytes are not a WebAssembly module",
        )),
        Callable::Binary(bytes) => Ok(Source::Binary(bytes)),
        Callable::Native { name } => Err(Error::not_serializable(format!(
            "native function `{}` cannot be serialized for an isolate",
            name
        ))),
    }
}

/// Creates a worker that runs `callable` off the caller's task.
///
/// Fails synchronously with `InvalidArgument` or `NotSerializable` if the
/// callable cannot be used at all, and with `ChannelUnavailable` if an isolate
/// was wanted but could not be started. Errors that can only be discovered by
/// loading the callable (bad module, missing dependency) surface later, as
/// failures of the calls that were waiting.
///
/// With isolates, this must be called inside a tokio runtime.
pub fn create_inline_worker(callable: Callable, options: WorkerOptions) -> Result<InlineWorker> {
    let source = validate(callable, &options)?;
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| format!("isocall-worker-{}", NEXT_WORKER.fetch_add(1, Ordering::Relaxed)));

    let payload = bootstrap::build(source, options.dependencies).with_entry(options.entry);
    tracing::trace!(worker = %name, "bootstrap payload:\n{}", payload);

    let use_isolate = match options.isolation {
        Isolation::Auto => capability::isolates_available(),
        Isolation::Inline => false,
    };

    let executor: Arc<dyn CallExecutor> = if use_isolate {
        let channel = ThreadChannel::spawn(&name, payload).map_err(|e| {
            tracing::error!(worker = %name, error = %e, "failed to create isolate");
            Error::new(ErrorKind::ChannelUnavailable, e.to_string())
        })?;
        tracing::debug!(worker = %name, "isolate started");
        Arc::new(Dispatcher::new(name, Box::new(channel)))
    } else {
        Arc::new(FallbackExecutor::new(name, payload))
    };

    Ok(InlineWorker { executor })
}

/// A callable running out of line.
///
/// Cheap to clone; clones share the same executor. Once the last clone is
/// dropped, an isolate-backed worker is terminated.
#[derive(Clone)]
pub struct InlineWorker {
    executor: Arc<dyn CallExecutor>,
}

impl InlineWorker {
    /// Wraps an executor built by hand, e.g. a [`Dispatcher`] over a custom channel.
    pub fn from_executor(executor: Arc<dyn CallExecutor>) -> Self {
        Self { executor }
    }

    /// Calls the function with `args`. The request is posted before this returns.
    pub fn call(&self, args: Vec<Value>) -> PendingCall {
        self.executor.invoke(args)
    }

    /// Fails every pending call and shuts the isolate down. Later calls fail
    /// with `ChannelUnavailable`. On a fallback worker this only logs.
    pub fn terminate(&self) {
        self.executor.terminate();
    }

    /// The isolate channel, or `None` once terminated or on a fallback worker.
    pub fn channel_handle(&self) -> Option<Arc<dyn Channel>> {
        self.executor.channel_handle()
    }

    /// Whether calls run in the caller's task rather than on an isolate.
    pub fn is_fallback(&self) -> bool {
        self.executor.is_fallback()
    }
}
