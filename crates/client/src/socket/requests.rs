// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response correlation over the socket.
//!
//! Each outbound request gets a fresh request id. The matching `response`
//! envelope completes the request; unmatched responses are ignored. A
//! periodic sweep handles requests that never get an answer.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use msync_core::protocol::{ClientEnvelope, RequestBody, ResponseBody};
use msync_core::sync_event::ERROR_REQUEST_TIMEOUT;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RequestConfig;
use crate::error::{Error, Result};
use crate::outbox::{Effect, Outbox};

/// Who is waiting for a socket response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Waiter {
    /// Liveness ping.
    Ping,
    /// Event replay started from `from`.
    Replay { from: DateTime<Utc> },
    /// A queued sync event.
    Sync { event_id: u64 },
    /// A caller of `Client::send_request`, keyed by reply token.
    External { token: u64 },
}

/// A finished socket request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestCompletion {
    pub request_id: String,
    pub waiter: Waiter,
    pub success: bool,
    pub data: Value,
}

/// What a cleanup sweep decided.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Idle,
    /// Stale requests were removed while the socket was otherwise alive.
    TimedOut(Vec<RequestCompletion>),
    /// Nothing arrived recently; the whole connection looks dead.
    Reconnect,
}

#[derive(Debug)]
struct PendingRequest {
    sent_at: Instant,
    waiter: Waiter,
}

pub struct RequestManager {
    timeout: Duration,
    cleanup_interval: Duration,
    pending: HashMap<String, PendingRequest>,
    next_sweep: Option<Instant>,
}

/// Failure data for a request that could not be sent.
pub fn not_connected_data() -> Value {
    json!({
        "id": "not_connected",
        "code": 0,
        "message": "socket is not connected",
    })
}

/// Failure data for a request the server never answered.
pub fn timeout_data() -> Value {
    json!({
        "id": ERROR_REQUEST_TIMEOUT,
        "code": 0,
        "message": "the server did not respond to the request",
    })
}

impl RequestManager {
    pub fn new(config: &RequestConfig) -> Self {
        RequestManager {
            timeout: config.timeout(),
            cleanup_interval: config.cleanup_interval(),
            pending: HashMap::new(),
            next_sweep: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Sends a request, returning its id.
    ///
    /// Fails with [`Error::NotConnected`] when the socket is closed; nothing
    /// is queued in that case.
    pub fn send(
        &mut self,
        mut body: RequestBody,
        waiter: Waiter,
        socket_open: bool,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<String> {
        if !socket_open {
            return Err(Error::NotConnected);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        body.request_id = request_id.clone();
        debug!(%request_id, method = %body.method, "socket request");

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                sent_at: now,
                waiter,
            },
        );
        out.push(Effect::Send(ClientEnvelope::Request(body)));

        if self.next_sweep.is_none() {
            self.next_sweep = Some(now + self.cleanup_interval);
        }
        Ok(request_id)
    }

    /// Matches a response to its pending request.
    pub fn resolve(&mut self, response: &ResponseBody) -> Option<RequestCompletion> {
        let Some(pending) = self.pending.remove(&response.request_id) else {
            debug!(request_id = %response.request_id, "unmatched socket response");
            return None;
        };
        if self.pending.is_empty() {
            self.next_sweep = None;
        }
        Some(RequestCompletion {
            request_id: response.request_id.clone(),
            waiter: pending.waiter,
            success: response.success,
            data: response.data.clone(),
        })
    }

    /// Runs the cleanup sweep if it is due.
    ///
    /// Stale requests are only timed out one by one when the socket saw
    /// traffic within the timeout window; otherwise a reconnect is asked
    /// for. Timed-out requests are removed before their completions are
    /// returned.
    pub fn sweep(
        &mut self,
        now: Instant,
        last_data_at: Option<Instant>,
        socket_open: bool,
    ) -> SweepOutcome {
        if !self.next_sweep.is_some_and(|at| at <= now) {
            return SweepOutcome::Idle;
        }
        self.next_sweep = None;
        if self.pending.is_empty() {
            return SweepOutcome::Idle;
        }
        self.next_sweep = Some(now + self.cleanup_interval);
        if !socket_open {
            return SweepOutcome::Idle;
        }

        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.sent_at) >= self.timeout)
            .map(|(request_id, _)| request_id.clone())
            .collect();
        if stale.is_empty() {
            return SweepOutcome::Idle;
        }

        let recent_traffic =
            last_data_at.is_some_and(|at| now.saturating_duration_since(at) < self.timeout);
        if !recent_traffic {
            warn!(stale = stale.len(), "no socket traffic, forcing reconnect");
            return SweepOutcome::Reconnect;
        }

        let mut completions = Vec::with_capacity(stale.len());
        for request_id in stale {
            if let Some(request) = self.pending.remove(&request_id) {
                debug!(%request_id, "socket request timed out");
                completions.push(RequestCompletion {
                    request_id,
                    waiter: request.waiter,
                    success: false,
                    data: timeout_data(),
                });
            }
        }
        if self.pending.is_empty() {
            self.next_sweep = None;
        }
        SweepOutcome::TimedOut(completions)
    }

    /// Drops every pending request without completing it.
    ///
    /// Returns the abandoned waiters so their owners can release them.
    pub fn clear(&mut self) -> Vec<Waiter> {
        self.next_sweep = None;
        self.pending
            .drain()
            .map(|(_, request)| request.waiter)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_sweep
    }

    pub fn destroy(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
#[path = "requests_tests.rs"]
mod tests;
