// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket wire envelopes and REST error bodies.
//!
//! Server to client:
//! - `change`: create/delete/patch pushes for cached objects
//! - `response`: replies to client requests, correlated by `request_id`
//!
//! Every server envelope carries a per-connection `counter` and a
//! `timestamp` used for gap detection and replay.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::patch::PatchOp;

/// RPC method asking the server to resend events since a timestamp.
pub const METHOD_EVENT_REPLAY: &str = "Event.replay";

/// Lightweight RPC used as the liveness ping.
pub const METHOD_COUNTER_READ: &str = "Counter.read";

/// The `type` discriminator of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Change,
    Response,
    Request,
    Signal,
    /// Any type this client does not route.
    #[serde(other)]
    Other,
}

/// An envelope pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Per-connection sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<i64>,
    /// Server time of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Value,
}

impl ServerEnvelope {
    /// Creates a `change` envelope.
    pub fn change(counter: i64, timestamp: DateTime<Utc>, body: &ChangeBody) -> Result<Self> {
        Ok(ServerEnvelope {
            kind: EnvelopeKind::Change,
            counter: Some(counter),
            timestamp: Some(timestamp),
            body: serde_json::to_value(body)?,
        })
    }

    /// Creates a `response` envelope.
    pub fn response(counter: i64, timestamp: DateTime<Utc>, body: &ResponseBody) -> Result<Self> {
        Ok(ServerEnvelope {
            kind: EnvelopeKind::Response,
            counter: Some(counter),
            timestamp: Some(timestamp),
            body: serde_json::to_value(body)?,
        })
    }

    /// Parses the body of a `change` envelope.
    pub fn change_body(&self) -> Result<ChangeBody> {
        Ok(ChangeBody::deserialize(&self.body)?)
    }

    /// Parses the body of a `response` envelope.
    pub fn response_body(&self) -> Result<ResponseBody> {
        Ok(ResponseBody::deserialize(&self.body)?)
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes the envelope from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Reference to a server object: its id and type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ObjectRef {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        ObjectRef {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Operation carried by a `change` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Delete,
    Patch,
}

/// Body of a `change` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBody {
    pub operation: ChangeOperation,
    pub object: ObjectRef,
    /// Full object for `create`, patch operations for `patch`.
    #[serde(default)]
    pub data: Value,
}

impl ChangeBody {
    /// Reads `data` as a list of patch operations.
    pub fn patch_ops(&self) -> Result<Vec<PatchOp>> {
        if self.data.is_null() {
            return Ok(Vec::new());
        }
        Ok(Vec::<PatchOp>::deserialize(&self.data)?)
    }
}

/// Body of a `response` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: Value,
}

/// Body of a client `request` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    /// Filled in by the request manager when the request is sent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RequestBody {
    /// Creates a request for the given RPC method.
    pub fn new(method: impl Into<String>) -> Self {
        RequestBody {
            request_id: String::new(),
            method: method.into(),
            object_id: None,
            data: None,
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Creates an `Event.replay` request.
    pub fn replay(from: DateTime<Utc>) -> Self {
        RequestBody::new(METHOD_EVENT_REPLAY).with_data(serde_json::json!({
            "from_timestamp": from.to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }

    /// Creates a `Counter.read` request.
    pub fn counter_read() -> Self {
        RequestBody::new(METHOD_COUNTER_READ)
    }
}

/// An envelope sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Request(RequestBody),
    Signal(Value),
}

impl ClientEnvelope {
    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes the envelope from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Error body returned by the REST API and in failed socket responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ServerError {
    /// Reads an error body out of arbitrary response data.
    ///
    /// Returns `None` when the data is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        ServerError::deserialize(value).ok()
    }

    /// The authentication nonce, when the server asks the client to reauthenticate.
    pub fn nonce(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get("nonce"))
            .and_then(Value::as_str)
            .filter(|nonce| !nonce.is_empty())
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
