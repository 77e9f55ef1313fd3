//! # isocall
//!
//! Run a self-contained WebAssembly function on an isolate thread and call it
//! like an async function.
//!
//! ```ignore
//! let worker = isocall::create_inline_worker(ADD_WAT.into(), WorkerOptions::new())?;
//! let sum = worker.call(vec![json!(5), json!(7)]).await?;
//! ```
//!
//! Calls are correlated with their answers by a [`Dispatcher`]; failures that
//! hit the isolate as a whole settle every waiting call at once. Where isolates
//! are unavailable, the same API runs the function in the caller's task.

pub mod bootstrap;
pub mod capability;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod logging;
pub mod pending;
pub mod thread_channel;
pub mod worker;

#[cfg(test)]
mod mock_channel;

pub use channel::Channel;
pub use channel::ChannelEvent;
pub use config::Isolation;
pub use config::WorkerOptions;
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use executor::CallExecutor;
pub use fallback::FallbackExecutor;
pub use pending::PendingCall;
pub use serde_json::Value;
pub use thread_channel::ThreadChannel;
pub use worker::Callable;
pub use worker::InlineWorker;
pub use worker::create_inline_worker;
