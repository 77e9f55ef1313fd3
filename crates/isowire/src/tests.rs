//! Tests for the wire protocol.

use serde_json::Value;
use serde_json::json;

use crate::ErrorDescriptor;
use crate::INIT_ERROR_ID;
use crate::Request;
use crate::Response;
use crate::decode_request;
use crate::decode_response;
use crate::encode_request;
use crate::encode_response;

fn as_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[test]
fn test_request_shape() {
    let bytes = encode_request(&Request::new("call-1", vec![json!(5), json!(7)])).unwrap();
    assert_eq!(as_json(&bytes), json!({"id": "call-1", "args": [5, 7]}));
}

#[test]
fn test_request_roundtrip() {
    let request = Request::new("call-9", vec![json!({"nested": [1, 2]}), json!("text")]);
    let bytes = encode_request(&request).unwrap();
    assert_eq!(decode_request(&bytes).unwrap(), request);
}

#[test]
fn test_request_missing_id_is_malformed() {
    let err = decode_request(br#"{"args": [1]}"#).unwrap_err();
    assert!(err.to_string().contains("Malformed message"));
}

#[test]
fn test_request_non_array_args_is_malformed() {
    assert!(decode_request(br#"{"id": "call-1", "args": 5}"#).is_err());
    assert!(decode_request(br#"{"id": "call-1"}"#).is_err());
}

#[test]
fn test_request_numeric_id_is_malformed() {
    assert!(decode_request(br#"{"id": 3, "args": []}"#).is_err());
}

#[test]
fn test_response_ok_shape() {
    let bytes = encode_response(&Response::ok("call-1", json!(12))).unwrap();
    assert_eq!(as_json(&bytes), json!({"id": "call-1", "result": 12}));
}

#[test]
fn test_response_err_shape() {
    let error = ErrorDescriptor::new("Error", "boom").with_trace("at f");
    let bytes = encode_response(&Response::err("call-2", error)).unwrap();
    assert_eq!(
        as_json(&bytes),
        json!({"id": "call-2", "error": {"name": "Error", "message": "boom", "stack": "at f"}})
    );
}

#[test]
fn test_response_outcome_result() {
    let response = decode_response(br#"{"id": "call-1", "result": 12}"#).unwrap();
    assert!(!response.is_init_failure());
    assert_eq!(response.into_outcome().unwrap(), json!(12));
}

#[test]
fn test_response_missing_result_is_null() {
    let response = decode_response(br#"{"id": "call-1"}"#).unwrap();
    assert_eq!(response.into_outcome().unwrap(), Value::Null);

    let response = decode_response(br#"{"id": "call-1", "result": null}"#).unwrap();
    assert_eq!(response.into_outcome().unwrap(), Value::Null);
}

#[test]
fn test_response_error_wins_over_result() {
    let response = decode_response(
        br#"{"id": "call-1", "result": 1, "error": {"name": "Error", "message": "boom"}}"#,
    )
    .unwrap();
    let error = response.into_outcome().unwrap_err();
    assert_eq!(error.kind, "Error");
    assert_eq!(error.message, "boom");
    assert_eq!(error.trace, None);
}

#[test]
fn test_response_error_accepts_aliases() {
    let response = decode_response(
        br#"{"id": "call-1", "error": {"kind": "TypeError", "message": "bad", "trace": "t"}}"#,
    )
    .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.kind, "TypeError");
    assert_eq!(error.trace.as_deref(), Some("t"));
}

#[test]
fn test_response_error_string_is_normalized() {
    let response = decode_response(br#"{"id": "call-1", "error": "boom"}"#).unwrap();
    assert_eq!(response.error, Some(ErrorDescriptor::new("Error", "boom")));
}

#[test]
fn test_response_error_unknown_shape_is_normalized() {
    let response = decode_response(br#"{"id": "call-1", "error": 42}"#).unwrap();
    assert_eq!(response.error, Some(ErrorDescriptor::unknown()));

    let response = decode_response(br#"{"id": "call-1", "error": {"code": 7}}"#).unwrap();
    assert_eq!(response.error, Some(ErrorDescriptor::unknown()));
}

#[test]
fn test_response_error_null_is_absent() {
    let response = decode_response(br#"{"id": "call-1", "result": 3, "error": null}"#).unwrap();
    assert_eq!(response.into_outcome().unwrap(), json!(3));
}

#[test]
fn test_init_failure_sentinel() {
    let error = ErrorDescriptor::new("ImportScriptsError", "Failed to load dependencies: nope");
    let bytes = encode_response(&Response::init_failure(error.clone())).unwrap();
    let response = decode_response(&bytes).unwrap();
    assert_eq!(response.id, INIT_ERROR_ID);
    assert!(response.is_init_failure());
    assert_eq!(response.error, Some(error));
}

#[test]
fn test_descriptor_from_object_with_message() {
    let desc = ErrorDescriptor::from_value(&json!({"message": "m", "name": "", "stack": "s"}));
    assert_eq!(desc.kind, "Error");
    assert_eq!(desc.message, "m");
    assert_eq!(desc.trace.as_deref(), Some("s"));

    let desc = ErrorDescriptor::from_value(&json!({"message": {"detail": 1}}));
    assert_eq!(desc.message, r#"{"detail":1}"#);
}

#[test]
fn test_descriptor_display() {
    assert_eq!(ErrorDescriptor::new("RangeError", "too big").to_string(), "RangeError: too big");
}

#[test]
fn test_malformed_bytes() {
    assert!(decode_response(b"\xff\xff").is_err());
    assert!(decode_response(br#"{"result": 1}"#).is_err());
}
