// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The outbound mutation queue.
//!
//! Events fire strictly one at a time in FIFO order, so the server applies
//! mutations in the order they were made and later events can rely on
//! objects created by earlier ones. Two rules bend the order:
//!
//! - a PATCH for an object whose CREATE has not fired yet is dropped,
//!   since the create will carry the full current state;
//! - a DELETE purges queued events that depend on the deleted object.
//!
//! Failures are classified by [`classify_failure`] and either retried,
//! paused until connectivity returns, or surfaced as terminal.

use std::time::Duration;

use msync_core::backoff::{backoff_with_jitter, jitter_unit};
use msync_core::http::HttpResponse;
use msync_core::protocol::ServerError;
use msync_core::sync_event::{
    classify_failure, FailureClass, FailureInput, Operation, RetryLimits, SyncEvent, SyncOutcome,
    SyncPayload,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::ClientEvent;
use crate::online::CheckWaiter;
use crate::outbox::{Effect, HttpPurpose, Outbox};
use crate::socket::Waiter;

/// Connectivity facts the queue needs when deciding whether to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncContext {
    pub online: bool,
    pub socket_open: bool,
}

/// The raw result of firing an event.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub success: bool,
    /// The request never reached the server.
    pub offline: bool,
    pub status: Option<u16>,
    pub data: Value,
}

impl SyncResult {
    pub fn from_http(response: &HttpResponse) -> Self {
        SyncResult {
            success: response.is_success(),
            offline: response.is_offline(),
            status: response.status,
            data: response.body.clone(),
        }
    }

    pub fn from_socket(success: bool, data: Value) -> Self {
        SyncResult {
            success,
            offline: false,
            status: None,
            data,
        }
    }

    pub fn offline() -> Self {
        SyncResult {
            success: false,
            offline: true,
            status: None,
            data: Value::Null,
        }
    }
}

/// Why the queue head is not firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// Refire the head at the given time.
    Refire(Instant),
    /// Waiting for an active connectivity check.
    OnlineCheck,
    /// The caller must reauthenticate, then resume or cancel.
    Reauthorize,
    /// Waiting for connectivity to return.
    Offline,
}

pub struct SyncManager {
    queue: Vec<SyncEvent>,
    next_id: u64,
    limits: RetryLimits,
    max_unavailable_wait: f64,
    refire_delay: Duration,
    jitter: fn() -> f64,
    hold: Option<Hold>,
    destroyed: bool,
}

impl SyncManager {
    pub fn new(config: &SyncConfig) -> Self {
        SyncManager {
            queue: Vec::new(),
            next_id: 0,
            limits: RetryLimits {
                max_retries: config.max_retries,
                cors_reconnect_threshold: config.cors_reconnect_threshold,
            },
            max_unavailable_wait: config.max_unavailable_wait_secs as f64,
            refire_delay: config.refire_delay(),
            jitter: jitter_unit,
            hold: None,
            destroyed: false,
        }
    }

    /// Replaces the random source used for retry jitter.
    pub fn with_jitter(mut self, jitter: fn() -> f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn queue(&self) -> &[SyncEvent] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn firing_count(&self) -> usize {
        self.queue.iter().filter(|event| event.firing).count()
    }

    /// True while the head waits for the caller to reauthenticate.
    pub fn awaiting_reauthorization(&self) -> bool {
        self.hold == Some(Hold::Reauthorize)
    }

    /// Queues an event, returning its id, or `None` when it was merged away.
    ///
    /// Invalid events fail immediately and are never queued.
    pub fn request(
        &mut self,
        mut event: SyncEvent,
        ctx: SyncContext,
        out: &mut Outbox,
    ) -> Result<Option<u64>> {
        event.validate()?;
        if self.destroyed {
            return Ok(None);
        }

        if event.operation == Operation::Patch {
            if let Some(target) = event.target.as_deref() {
                let pending_create = self.queue.iter().any(|queued| {
                    queued.operation == Operation::Post && !queued.firing && queued.target_is(target)
                });
                if pending_create {
                    debug!(%target, "dropping patch, create not sent yet");
                    return Ok(None);
                }
            }
        }
        if event.operation == Operation::Delete {
            if let Some(target) = event.target.clone() {
                self.purge_dependents(&target);
            }
        }

        self.next_id += 1;
        event.id = self.next_id;
        debug!(event_id = event.id, operation = %event.operation, "queued");
        out.emit(ClientEvent::SyncAdded {
            event_id: event.id,
            operation: event.operation.clone(),
            target: event.target.clone(),
        });
        let id = event.id;
        self.queue.push(event);
        self.process_next(ctx, out);
        Ok(Some(id))
    }

    /// Fires the queue head if nothing blocks it.
    pub fn process_next(&mut self, ctx: SyncContext, out: &mut Outbox) {
        if self.destroyed || self.hold.is_some() || !ctx.online {
            return;
        }
        let Some(head) = self.queue.first_mut() else {
            return;
        };
        if head.firing {
            return;
        }
        if head.is_websocket() && !ctx.socket_open {
            debug!(event_id = head.id, "waiting for socket");
            return;
        }

        head.firing = true;
        debug!(event_id = head.id, operation = %head.operation, "firing");
        let effect = match &head.payload {
            SyncPayload::Xhr(request) => Effect::Http {
                purpose: HttpPurpose::Sync { event_id: head.id },
                request: request.clone(),
            },
            SyncPayload::WebSocket(body) => Effect::Request {
                body: body.clone(),
                waiter: Waiter::Sync { event_id: head.id },
            },
        };
        out.push(effect);
    }

    /// Handles the result of firing `event_id`.
    ///
    /// Results for anything but the firing head are stale and ignored.
    pub fn on_result(
        &mut self,
        event_id: u64,
        result: SyncResult,
        now: Instant,
        ctx: SyncContext,
        out: &mut Outbox,
    ) {
        let is_firing_head = self
            .queue
            .first()
            .is_some_and(|head| head.id == event_id && head.firing);
        if self.destroyed || !is_firing_head {
            debug!(event_id, "ignoring stale sync result");
            return;
        }

        if result.success {
            let mut event = self.queue.remove(0);
            event.firing = false;
            event.success = Some(true);
            debug!(event_id, "synced");
            event.notify(&SyncOutcome::Success {
                status: result.status,
                data: result.data.clone(),
            });
            out.emit(ClientEvent::SyncSucceeded {
                event_id,
                operation: event.operation,
                target: event.target,
                data: result.data,
            });
            self.process_next(ctx, out);
            return;
        }

        let head = &mut self.queue[0];
        head.firing = false;
        let input = FailureInput {
            offline: result.offline,
            status: result.status,
            error: ServerError::from_value(&result.data),
            retry_count: head.retry_count,
            return_to_online_count: head.return_to_online_count,
        };
        let class = classify_failure(&input, &self.limits);
        debug!(event_id, %class, status = ?result.status, "sync failed");

        match class {
            FailureClass::Offline => {
                info!(event_id, "offline, pausing queue");
                self.hold = Some(Hold::Offline);
            }
            FailureClass::ValidateOnlineAndRetry => {
                self.hold = Some(Hold::OnlineCheck);
                out.push(Effect::CheckOnline(CheckWaiter::Sync { event_id }));
            }
            FailureClass::ServerUnavailable => {
                head.retry_count += 1;
                let seconds = backoff_with_jitter(
                    self.max_unavailable_wait,
                    head.retry_count,
                    (self.jitter)(),
                );
                let delay = Duration::from_secs_f64(seconds);
                info!(event_id, retry = head.retry_count, ?delay, "server unavailable, retrying");
                self.hold = Some(Hold::Refire(now + delay));
            }
            FailureClass::Reauthorize => {
                warn!(event_id, "server asked for reauthentication");
                head.notify(&SyncOutcome::Failure {
                    class,
                    status: result.status,
                    data: result.data,
                });
                self.hold = Some(Hold::Reauthorize);
            }
            terminal => self.fail_head(terminal, result, ctx, out),
        }
    }

    /// Result of the connectivity check requested for `event_id`.
    pub fn on_online_check(
        &mut self,
        event_id: u64,
        online: bool,
        ctx: SyncContext,
        out: &mut Outbox,
    ) {
        if self.hold != Some(Hold::OnlineCheck)
            || self.queue.first().map(|head| head.id) != Some(event_id)
        {
            return;
        }
        if !online {
            self.hold = Some(Hold::Offline);
            return;
        }
        if let Some(head) = self.queue.first_mut() {
            head.retry_count += 1;
        }
        self.hold = None;
        self.process_next(ctx, out);
    }

    /// Connectivity returned; refire shortly.
    pub fn on_online(&mut self, now: Instant) {
        if matches!(self.hold, None | Some(Hold::Offline)) && !self.queue.is_empty() {
            self.hold = Some(Hold::Refire(now + self.refire_delay));
        }
    }

    /// The socket connected: count the reconnect against every queued event
    /// and refire shortly. Reauthorization and online-check holds are kept.
    pub fn on_connected(&mut self, now: Instant) {
        for event in &mut self.queue {
            event.return_to_online_count = event.return_to_online_count.saturating_add(1);
        }
        let refire = matches!(
            self.hold,
            None | Some(Hold::Offline) | Some(Hold::Refire(_))
        );
        if refire && !self.queue.is_empty() {
            self.hold = Some(Hold::Refire(now + self.refire_delay));
        }
    }

    /// The socket closed: a socket-bound head in flight is abandoned and
    /// will fire again.
    pub fn on_disconnected(&mut self) {
        if let Some(head) = self.queue.first_mut() {
            if head.firing && head.is_websocket() {
                debug!(event_id = head.id, "socket closed while firing");
                head.firing = false;
            }
        }
    }

    /// Lifts a reauthorization hold and refires the head.
    pub fn resume(&mut self, ctx: SyncContext, out: &mut Outbox) {
        if self.hold == Some(Hold::Reauthorize) {
            self.hold = None;
            self.process_next(ctx, out);
        }
    }

    /// Removes a queued event that is not in flight.
    pub fn cancel(&mut self, event_id: u64, ctx: SyncContext, out: &mut Outbox) -> bool {
        let Some(index) = self.queue.iter().position(|event| event.id == event_id) else {
            return false;
        };
        if self.queue[index].firing {
            return false;
        }
        self.queue.remove(index);
        debug!(event_id, "cancelled");
        if index == 0 {
            self.hold = None;
            self.process_next(ctx, out);
        }
        true
    }

    pub fn poll_timers(&mut self, now: Instant, ctx: SyncContext, out: &mut Outbox) {
        if let Some(Hold::Refire(at)) = self.hold {
            if at <= now {
                self.hold = None;
                self.process_next(ctx, out);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.hold {
            Some(Hold::Refire(at)) => Some(at),
            _ => None,
        }
    }

    /// Stops acting on results; in-flight requests are left to finish.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.hold = None;
        self.queue.clear();
    }

    fn fail_head(
        &mut self,
        class: FailureClass,
        result: SyncResult,
        ctx: SyncContext,
        out: &mut Outbox,
    ) {
        let mut event = self.queue.remove(0);
        event.success = Some(false);
        warn!(event_id = event.id, %class, status = ?result.status, "sync failed permanently");

        // Dependents are purged before the callback so it sees the final queue.
        if event.operation == Operation::Post {
            if let Some(target) = &event.target {
                self.purge_dependents(target);
            }
        }

        event.notify(&SyncOutcome::Failure {
            class,
            status: result.status,
            data: result.data.clone(),
        });
        out.emit(ClientEvent::SyncFailed {
            event_id: event.id,
            operation: event.operation,
            target: event.target,
            class,
            status: result.status,
            data: result.data,
        });
        self.process_next(ctx, out);
    }

    /// Drops queued events that depend on `target`, except one in flight.
    fn purge_dependents(&mut self, target: &str) {
        self.queue.retain(|event| {
            let purge = !event.firing && event.depends_on(target);
            if purge {
                debug!(event_id = event.id, %target, "purging dependent event");
            }
            !purge
        });
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
