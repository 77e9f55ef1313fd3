//! # Call Errors
//!
//! Every way a call can fail, as seen by the caller. Each failure carries a
//! [`ErrorKind`] discriminator plus the `name` and `message` that describe it.
//! For failures that originate in the isolate, `name` is whatever the isolate
//! reported (e.g. `"RuntimeError"`); otherwise it is the kind's own name.

use std::fmt;

use isowire::ErrorDescriptor;
use isowire::descriptor::DEPENDENCY_LOAD_FAILURE;

/// Descriptor names that mark a dependency failure on the init sentinel.
const DEPENDENCY_FAILURE_NAMES: &[&str] = &[DEPENDENCY_LOAD_FAILURE, "ImportScriptsError"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input to worker creation.
    InvalidArgument,
    /// The callable has no body that can be shipped to an isolate.
    NotSerializable,
    /// A call was attempted after the channel was disposed.
    ChannelUnavailable,
    /// The channel refused a send.
    SendFailure,
    /// A dependency failed to load before any call was served.
    DependencyLoadFailure,
    /// The callable could not be constructed before any call was served.
    FunctionInitializationFailure,
    /// The callable failed while serving this call.
    WorkerSideError,
    /// The channel failed in a way not tied to any call.
    ChannelFault,
    /// The worker was shut down by its owner.
    Terminated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotSerializable => "NotSerializable",
            Self::ChannelUnavailable => "ChannelUnavailable",
            Self::SendFailure => "SendFailure",
            Self::DependencyLoadFailure => "DependencyLoadFailure",
            Self::FunctionInitializationFailure => "FunctionInitializationFailure",
            Self::WorkerSideError => "WorkerSideError",
            Self::ChannelFault => "ChannelFault",
            Self::Terminated => "Terminated",
        }
    }

    /// Whether this failure settles every pending call rather than one.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::DependencyLoadFailure
                | Self::FunctionInitializationFailure
                | Self::ChannelFault
                | Self::Terminated
        )
    }

    /// Kind of an init failure reported under the given descriptor name.
    pub fn of_init_failure(name: &str) -> Self {
        if DEPENDENCY_FAILURE_NAMES.contains(&name) {
            Self::DependencyLoadFailure
        } else {
            Self::FunctionInitializationFailure
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure a call settles with.
///
/// `Clone` because one broadcast fault settles many calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    name: String,
    message: String,
    trace: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_serializable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSerializable, message)
    }

    pub fn channel_unavailable() -> Self {
        Self::new(ErrorKind::ChannelUnavailable, "isolate is not available or has been terminated")
    }

    pub fn send_failure(cause: impl fmt::Display) -> Self {
        Self::new(ErrorKind::SendFailure, format!("failed to post call to isolate: {}", cause))
    }

    pub fn channel_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChannelFault, message)
    }

    pub fn terminated() -> Self {
        Self::new(ErrorKind::Terminated, "isolate terminated by its owner")
    }

    /// Rebuilds an error the isolate raised while serving one call.
    pub fn from_call_failure(descriptor: ErrorDescriptor) -> Self {
        Self::from_descriptor(ErrorKind::WorkerSideError, descriptor)
    }

    /// Rebuilds an error the isolate raised before it could serve any call.
    pub fn from_init_failure(descriptor: ErrorDescriptor) -> Self {
        let kind = ErrorKind::of_init_failure(&descriptor.kind);
        Self::from_descriptor(kind, descriptor)
    }

    fn from_descriptor(kind: ErrorKind, descriptor: ErrorDescriptor) -> Self {
        Self {
            kind,
            name: descriptor.kind,
            message: descriptor.message,
            trace: descriptor.trace,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
