// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound mutation events and failure classification.
//!
//! A [`SyncEvent`] is one queued mutation. Its payload is either a REST
//! request or a socket request; the sync manager dispatches on the variant.
//! When a request fails, [`classify_failure`] decides what happens next.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::http::HttpRequest;
use crate::ids::validate_id;
use crate::protocol::{RequestBody, ServerError};

/// Error id the server uses for a missing object.
pub const ERROR_NOT_FOUND: &str = "not_found";
/// Error id the server uses when a client-chosen id already exists.
pub const ERROR_ID_IN_USE: &str = "id_in_use";
/// Error id for a request that timed out before the server answered.
pub const ERROR_REQUEST_TIMEOUT: &str = "request_timeout";
/// Error id carried by authentication challenges.
pub const ERROR_AUTHENTICATION_REQUIRED: &str = "authentication_required";

/// The kind of mutation an event performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Post,
    Patch,
    Delete,
    Receipt,
    #[serde(untagged)]
    Custom(String),
}

impl Operation {
    /// Whether the event must name the object it mutates.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            Operation::Patch | Operation::Delete | Operation::Receipt
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Post => f.write_str("POST"),
            Operation::Patch => f.write_str("PATCH"),
            Operation::Delete => f.write_str("DELETE"),
            Operation::Receipt => f.write_str("RECEIPT"),
            Operation::Custom(name) => f.write_str(name),
        }
    }
}

/// How an event reaches the server.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Xhr(HttpRequest),
    WebSocket(RequestBody),
}

/// Result of firing an event, as seen by its callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Success {
        status: Option<u16>,
        data: Value,
    },
    Failure {
        class: FailureClass,
        status: Option<u16>,
        data: Value,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }

    pub fn data(&self) -> &Value {
        match self {
            SyncOutcome::Success { data, .. } | SyncOutcome::Failure { data, .. } => data,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncOutcome::Success { status, .. } | SyncOutcome::Failure { status, .. } => *status,
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            SyncOutcome::Success { .. } => None,
            SyncOutcome::Failure { class, .. } => Some(*class),
        }
    }
}

pub type SyncCallback = Box<dyn FnMut(&SyncOutcome) + Send>;

/// A queued outbound mutation.
pub struct SyncEvent {
    /// Sequence number assigned when the event is queued.
    pub id: u64,
    pub operation: Operation,
    /// Object the event mutates; `None` for creates whose id the server assigns.
    pub target: Option<String>,
    /// Objects that must exist on the server before this event can succeed.
    pub depends: Vec<String>,
    pub payload: SyncPayload,
    pub retry_count: u32,
    /// Reconnects observed while the event sat in the queue.
    pub return_to_online_count: u32,
    pub firing: bool,
    pub success: Option<bool>,
    callback: Option<SyncCallback>,
}

impl SyncEvent {
    pub fn new(operation: Operation, payload: SyncPayload) -> Self {
        SyncEvent {
            id: 0,
            operation,
            target: None,
            depends: Vec::new(),
            payload,
            retry_count: 0,
            return_to_online_count: 0,
            firing: false,
            success: None,
            callback: None,
        }
    }

    /// An event sent as a REST request.
    pub fn xhr(operation: Operation, request: HttpRequest) -> Self {
        SyncEvent::new(operation, SyncPayload::Xhr(request))
    }

    /// An event sent as a socket request.
    pub fn websocket(operation: Operation, body: RequestBody) -> Self {
        SyncEvent::new(operation, SyncPayload::WebSocket(body))
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_callback(mut self, callback: impl FnMut(&SyncOutcome) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Checks required fields and id formats.
    pub fn validate(&self) -> Result<()> {
        match &self.target {
            Some(target) => validate_id(target)?,
            None if self.operation.requires_target() => return Err(Error::MissingField("target")),
            None => {}
        }
        for id in &self.depends {
            validate_id(id)?;
        }
        match &self.payload {
            SyncPayload::Xhr(request) if request.url.is_empty() => Err(Error::MissingField("url")),
            SyncPayload::WebSocket(body) if body.method.is_empty() => {
                Err(Error::MissingField("method"))
            }
            _ => Ok(()),
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.payload, SyncPayload::WebSocket(_))
    }

    pub fn target_is(&self, id: &str) -> bool {
        self.target.as_deref() == Some(id)
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.depends.iter().any(|dep| dep == id)
    }

    /// Invokes the callback, if any.
    pub fn notify(&mut self, outcome: &SyncOutcome) {
        if let Some(callback) = self.callback.as_mut() {
            callback(outcome);
        }
    }
}

impl fmt::Debug for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEvent")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("target", &self.target)
            .field("depends", &self.depends)
            .field("payload", &self.payload)
            .field("retry_count", &self.retry_count)
            .field("return_to_online_count", &self.return_to_online_count)
            .field("firing", &self.firing)
            .field("success", &self.success)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// What to do with a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// No connectivity; wait for the client to come back online.
    Offline,
    /// Repeatedly offline across reconnects; the request is being blocked.
    Cors,
    /// The request timed out; verify connectivity and retry.
    ValidateOnlineAndRetry,
    /// Gateway or availability error; retry with backoff.
    ServerUnavailable,
    TooManyFailuresWhileOnline,
    /// The server wants a new session; the caller decides what to do.
    Reauthorize,
    NotFound,
    InvalidId,
    ServerRejectedRequest,
}

impl FailureClass {
    /// Terminal failures remove the event from the queue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FailureClass::Cors
                | FailureClass::TooManyFailuresWhileOnline
                | FailureClass::NotFound
                | FailureClass::InvalidId
                | FailureClass::ServerRejectedRequest
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Offline => "offline",
            FailureClass::Cors => "cors",
            FailureClass::ValidateOnlineAndRetry => "validate_online_and_retry",
            FailureClass::ServerUnavailable => "server_unavailable",
            FailureClass::TooManyFailuresWhileOnline => "too_many_failures_while_online",
            FailureClass::Reauthorize => "reauthorize",
            FailureClass::NotFound => "not_found",
            FailureClass::InvalidId => "invalid_id",
            FailureClass::ServerRejectedRequest => "server_rejected_request",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about a failed attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureInput {
    /// The transport never reached the server.
    pub offline: bool,
    pub status: Option<u16>,
    pub error: Option<ServerError>,
    pub retry_count: u32,
    pub return_to_online_count: u32,
}

impl FailureInput {
    fn error_id(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.id.as_str())
    }
}

/// Retry thresholds for [`classify_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub max_retries: u32,
    /// Reconnects while offline after which the request counts as blocked.
    pub cors_reconnect_threshold: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        RetryLimits {
            max_retries: 20,
            cors_reconnect_threshold: 3,
        }
    }
}

/// Classifies a failed attempt. Rules are checked in order; the first match wins.
pub fn classify_failure(input: &FailureInput, limits: &RetryLimits) -> FailureClass {
    let retries_left = input.retry_count < limits.max_retries;

    if input.offline {
        if input.return_to_online_count >= limits.cors_reconnect_threshold {
            return FailureClass::Cors;
        }
        return FailureClass::Offline;
    }

    match input.error_id() {
        Some(ERROR_NOT_FOUND) => return FailureClass::NotFound,
        Some(ERROR_ID_IN_USE) => return FailureClass::InvalidId,
        _ => {}
    }

    if input.status == Some(408) || input.error_id() == Some(ERROR_REQUEST_TIMEOUT) {
        return if retries_left {
            FailureClass::ValidateOnlineAndRetry
        } else {
            FailureClass::TooManyFailuresWhileOnline
        };
    }

    if matches!(input.status, Some(502..=504)) {
        return if retries_left {
            FailureClass::ServerUnavailable
        } else {
            FailureClass::TooManyFailuresWhileOnline
        };
    }

    let auth_challenge = input.status == Some(401)
        || input.error_id() == Some(ERROR_AUTHENTICATION_REQUIRED);
    let has_nonce = input.error.as_ref().and_then(ServerError::nonce).is_some();
    if auth_challenge && has_nonce {
        return FailureClass::Reauthorize;
    }

    FailureClass::ServerRejectedRequest
}

#[cfg(test)]
#[path = "sync_event_tests.rs"]
mod tests;
