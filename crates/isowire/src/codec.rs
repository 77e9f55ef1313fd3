//! # Codec
//!
//! JSON framing for [`Request`] and [`Response`]. Decoding is strict about shape:
//! a request without a string `id` or with non-array `args` is malformed.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::message::Request;
use crate::message::Response;

#[derive(Debug, Clone)]
pub enum Error {
    /// The message could not be turned into bytes.
    Encode(String),
    /// The bytes are not a well-formed message.
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "Encode error: {}", msg),
            Self::Decode(msg) => write!(f, "Malformed message: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    encode(request)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    decode(bytes)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode(bytes)
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| Error::Encode(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}
