//! # isowire
//!
//! The message protocol spoken across an isolate channel.
//!
//! A dispatcher sends `Request { id, args }`; the isolate answers every request
//! with exactly one `Response` carrying either a `result` or an `error`. A
//! response addressed to [`INIT_ERROR_ID`] is not an answer to any call: it
//! reports that the isolate failed before it could serve anything.
//!
//! Messages travel as JSON bytes. The channel underneath never looks inside them.

pub mod codec;
pub mod descriptor;
pub mod message;

pub use codec::Error;
pub use codec::Result;
pub use codec::decode_request;
pub use codec::decode_response;
pub use codec::encode_request;
pub use codec::encode_response;
pub use descriptor::ErrorDescriptor;
pub use message::INIT_ERROR_ID;
pub use message::Request;
pub use message::Response;

#[cfg(test)]
mod tests;
