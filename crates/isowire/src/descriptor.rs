//! # Error Descriptors
//!
//! The isolate and the dispatcher share no error objects, only bytes. Whatever
//! went wrong on the far side is flattened into an `ErrorDescriptor` before it
//! crosses the channel, and rebuilt into a native error on arrival.
//!
//! On the wire the fields are spelled `name`, `message` and `stack`; `kind` and
//! `trace` are accepted too.

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

/// Kind used when the thrown value does not name one.
pub const DEFAULT_KIND: &str = "Error";

/// Init-failure kind: a dependency could not be loaded.
pub const DEPENDENCY_LOAD_FAILURE: &str = "DependencyLoadFailure";

/// Init-failure kind: the callable could not be constructed.
pub const FUNCTION_INITIALIZATION_FAILURE: &str = "FunctionInitializationFailure";

/// Message used when the thrown value carries nothing readable.
pub const UNKNOWN_MESSAGE: &str = "An unknown error occurred in the isolate.";

/// A serializable `{kind, message, trace?}` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Discriminator, e.g. `"Error"`, `"RuntimeError"`, `"DependencyLoadFailure"`.
    #[serde(rename = "name", alias = "kind")]
    pub kind: String,
    /// Human-readable text.
    pub message: String,
    #[serde(rename = "stack", alias = "trace", default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorDescriptor {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// The descriptor for a thrown value nobody could make sense of.
    pub fn unknown() -> Self {
        Self::new(DEFAULT_KIND, UNKNOWN_MESSAGE)
    }

    /// Normalizes a thrown value of any shape.
    ///
    /// - a string becomes the message of a plain `Error`
    /// - an object with a non-null `message` keeps its `name` and `stack` if present
    /// - anything else becomes [`ErrorDescriptor::unknown`]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new(DEFAULT_KIND, message.clone()),
            Value::Object(fields) => {
                let Some(message) = fields.get("message").filter(|m| !m.is_null()) else {
                    return Self::unknown();
                };
                let message = match message {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                let kind = fields
                    .get("name")
                    .or_else(|| fields.get("kind"))
                    .and_then(Value::as_str)
                    .filter(|kind| !kind.is_empty())
                    .unwrap_or(DEFAULT_KIND);
                let trace = fields
                    .get("stack")
                    .or_else(|| fields.get("trace"))
                    .and_then(Value::as_str)
                    .map(str::to_string);

                Self {
                    kind: kind.to_string(),
                    message,
                    trace,
                }
            }
            _ => Self::unknown(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Deserializes an optional `error` field of any shape.
pub(crate) fn lenient<'de, D>(deserializer: D) -> std::result::Result<Option<ErrorDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(|value| ErrorDescriptor::from_value(&value)))
}
