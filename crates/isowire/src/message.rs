//! # Messages
//!
//! Request: `{"id": "call-1", "args": [5, 7]}`
//!
//! Response: `{"id": "call-1", "result": 12}` or `{"id": "call-1", "error": {...}}`

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::descriptor;
use crate::descriptor::ErrorDescriptor;

/// Reserved id for a response that reports the isolate failed to start.
pub const INIT_ERROR_ID: &str = "init-error";

/// One call, dispatcher to isolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, args: Vec<Value>) -> Self {
        Self { id: id.into(), args }
    }
}

/// One answer, isolate to dispatcher.
///
/// When both fields are present, `error` wins. A missing or `null` result
/// settles the call with `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "descriptor::lenient", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorDescriptor) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// A broadcast report that the isolate cannot serve calls at all.
    pub fn init_failure(error: ErrorDescriptor) -> Self {
        Self::err(INIT_ERROR_ID, error)
    }

    pub fn is_init_failure(&self) -> bool {
        self.id == INIT_ERROR_ID
    }

    /// Splits the response into the call's outcome.
    pub fn into_outcome(self) -> std::result::Result<Value, ErrorDescriptor> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
