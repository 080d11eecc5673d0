// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::patch::PatchOperation;
use serde_json::json;
use yare::parameterized;

#[test]
fn parse_change_envelope() {
    let raw = r#"{
        "type": "change",
        "counter": 7,
        "timestamp": "2026-03-01T10:00:00.000Z",
        "body": {
            "operation": "patch",
            "object": {"id": "layer:///conversations/c1", "type": "Conversation"},
            "data": [{"operation": "set", "property": "metadata.title", "value": "Hi"}]
        }
    }"#;
    let envelope = ServerEnvelope::from_json(raw).unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::Change);
    assert_eq!(envelope.counter, Some(7));
    assert!(envelope.timestamp.is_some());

    let body = envelope.change_body().unwrap();
    assert_eq!(body.operation, ChangeOperation::Patch);
    assert_eq!(body.object.kind, "Conversation");

    let ops = body.patch_ops().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, PatchOperation::Set);
    assert_eq!(ops[0].property, "metadata.title");
}

#[test]
fn parse_response_envelope() {
    let raw = r#"{"type":"response","counter":3,"timestamp":"2026-03-01T10:00:00Z",
        "body":{"request_id":"r1","success":true,"data":{"counter":3}}}"#;
    let envelope = ServerEnvelope::from_json(raw).unwrap();
    let body = envelope.response_body().unwrap();
    assert_eq!(body.request_id, "r1");
    assert!(body.success);
    assert_eq!(body.data["counter"], 3);
}

#[parameterized(
    signal = { "signal", EnvelopeKind::Signal },
    unknown = { "presence", EnvelopeKind::Other },
)]
fn parse_envelope_kind(kind: &str, expected: EnvelopeKind) {
    let raw = format!(r#"{{"type":"{kind}","counter":1,"body":{{}}}}"#);
    let envelope = ServerEnvelope::from_json(&raw).unwrap();
    assert_eq!(envelope.kind, expected);
}

#[test]
fn envelope_without_counter() {
    let envelope = ServerEnvelope::from_json(r#"{"type":"signal"}"#).unwrap();
    assert_eq!(envelope.counter, None);
    assert_eq!(envelope.timestamp, None);
    assert!(envelope.body.is_null());
}

#[test]
fn malformed_change_body_is_an_error() {
    let envelope =
        ServerEnvelope::from_json(r#"{"type":"change","counter":1,"body":{"operation":"explode"}}"#)
            .unwrap();
    assert!(envelope.change_body().is_err());
}

#[test]
fn client_request_wire_shape() {
    let mut body = RequestBody::counter_read();
    body.request_id = "abc".into();
    let json: Value = serde_json::from_str(&ClientEnvelope::Request(body).to_json().unwrap()).unwrap();
    assert_eq!(
        json,
        json!({"type": "request", "body": {"request_id": "abc", "method": "Counter.read"}})
    );
}

#[test]
fn replay_request_carries_timestamp() {
    let from = "2026-03-01T10:00:00.250Z".parse::<DateTime<Utc>>().unwrap();
    let body = RequestBody::replay(from);
    assert_eq!(body.method, METHOD_EVENT_REPLAY);
    assert_eq!(
        body.data.unwrap()["from_timestamp"],
        "2026-03-01T10:00:00.250Z"
    );
}

#[test]
fn client_envelope_roundtrip_with_object_id() {
    let envelope = ClientEnvelope::Request(
        RequestBody::new("Message.receipt")
            .with_object_id("layer:///messages/m1")
            .with_data(json!({"type": "read"})),
    );
    let parsed = ClientEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(parsed, envelope);
}

#[test]
fn server_error_nonce() {
    let with_nonce = json!({"id": "authentication_required", "code": 4, "message": "auth", "data": {"nonce": "n1"}});
    assert_eq!(ServerError::from_value(&with_nonce).unwrap().nonce(), Some("n1"));

    let empty_nonce = json!({"id": "authentication_required", "data": {"nonce": ""}});
    assert_eq!(ServerError::from_value(&empty_nonce).unwrap().nonce(), None);

    let without = json!({"id": "forbidden", "message": "no"});
    assert_eq!(ServerError::from_value(&without).unwrap().nonce(), None);

    assert!(ServerError::from_value(&json!("oops")).is_none());
}
