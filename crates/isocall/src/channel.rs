//! # Isolate Channel
//!
//! A duplex, fire-and-forget pipe to one isolate.
//!
//! - **Byte-Oriented**: the channel moves opaque buffers. It knows nothing about
//!   call ids or results; correlation is the dispatcher's job.
//! - **Two kinds of inbound event**: a message the isolate posted, or a fault the
//!   transport observed outside the message protocol (e.g. the isolate crashed).

use std::fmt;

/// Errors raised by the channel itself.
#[derive(Debug, Clone)]
pub enum Error {
    /// The channel has been disposed.
    Disposed,
    /// The isolate is gone.
    ConnectionLost(String),
    /// The isolate could not be started.
    Spawn(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disposed => write!(f, "Channel disposed"),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Spawn(msg) => write!(f, "Failed to start isolate: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Something the channel delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A message posted by the isolate.
    Message(Vec<u8>),
    /// A transport-level failure not attributable to any message.
    Fault(String),
}

/// A duplex channel to one isolate.
///
/// This trait is designed to be object-safe (`Arc<dyn Channel>`).
///
/// # invariants
/// - `send` fails synchronously if the message cannot be posted.
/// - `recv` yields events in delivery order and returns `None` once the channel
///   is closed, whether by `dispose` or because the isolate went away.
/// - `dispose` may be called any number of times; only the first has an effect.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    fn send(&self, payload: &[u8]) -> Result<()>;

    async fn recv(&self) -> Option<ChannelEvent>;

    fn dispose(&self);
}
