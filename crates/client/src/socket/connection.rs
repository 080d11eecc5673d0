// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Socket connection lifecycle.
//!
//! The connection manager owns the single socket: it connects with a
//! timeout, reconnects with exponential backoff, pings to keep the link
//! alive, and watches the server's per-message counter. A jump in the
//! counter means pushes were missed; the manager then asks the server to
//! replay everything since the last timestamp it fully processed.
//!
//! Replays are serialized: while one is running, further requests only
//! remember the newest starting point, and a single follow-up replay is
//! issued when the current one finishes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use msync_core::backoff::backoff_duration;
use msync_core::protocol::{RequestBody, ServerEnvelope};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SocketConfig;
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::outbox::{Effect, Outbox};
use crate::socket::requests::{RequestManager, Waiter};
use crate::store::SessionProvider;

/// Cap on the attempt count fed to the reconnect backoff.
const MAX_RECONNECT_ATTEMPT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Connecting,
    Open,
}

/// Neighbours the connection manager talks to during one call.
pub struct SocketContext<'a> {
    pub now: Instant,
    pub online: bool,
    pub session: &'a dyn SessionProvider,
    pub requests: &'a mut RequestManager,
    pub out: &'a mut Outbox,
}

pub struct ConnectionManager {
    websocket_url: String,
    connect_timeout: Duration,
    ping_frequency: Duration,
    max_reconnect_wait: f64,
    replay_retry_delay: Duration,

    state: SocketState,
    /// Identifies the current connect attempt; results for older attempts are stale.
    attempt: u64,
    last_counter: i64,
    has_counter: bool,
    /// Timestamp of the last message accepted without a gap.
    last_timestamp: Option<DateTime<Utc>>,
    /// A gap was seen and not yet replayed; `last_timestamp` is pinned.
    gap_pending: bool,
    lost_connection_count: u32,
    in_replay: bool,
    needs_replay_from: Option<DateTime<Utc>>,
    replay_waiters: Vec<u64>,
    closing: bool,
    destroyed: bool,
    last_data_at: Option<Instant>,

    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    ping_at: Option<Instant>,
    replay_retry: Option<(Instant, DateTime<Utc>)>,
}

/// Builds the socket URL carrying the session token.
pub fn socket_url(base: &str, session_token: &str) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::Config(format!("invalid websocket_url '{}': {}", base, e)))?;
    url.query_pairs_mut()
        .append_pair("session_token", session_token);
    Ok(url.to_string())
}

impl ConnectionManager {
    pub fn new(websocket_url: impl Into<String>, config: &SocketConfig) -> Self {
        ConnectionManager {
            websocket_url: websocket_url.into(),
            connect_timeout: config.connect_timeout(),
            ping_frequency: config.ping_frequency(),
            max_reconnect_wait: config.max_reconnect_wait_secs as f64,
            replay_retry_delay: config.replay_retry_delay(),
            state: SocketState::Closed,
            attempt: 0,
            last_counter: -1,
            has_counter: false,
            last_timestamp: None,
            gap_pending: false,
            lost_connection_count: 0,
            in_replay: false,
            needs_replay_from: None,
            replay_waiters: Vec::new(),
            closing: false,
            destroyed: false,
            last_data_at: None,
            connect_deadline: None,
            reconnect_at: None,
            ping_at: None,
            replay_retry: None,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn last_counter(&self) -> i64 {
        self.last_counter
    }

    pub fn has_counter(&self) -> bool {
        self.has_counter
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn in_replay(&self) -> bool {
        self.in_replay
    }

    pub fn needs_replay_from(&self) -> Option<DateTime<Utc>> {
        self.needs_replay_from
    }

    pub fn lost_connection_count(&self) -> u32 {
        self.lost_connection_count
    }

    /// When the socket last delivered a message.
    pub fn last_data_at(&self) -> Option<Instant> {
        self.last_data_at
    }

    /// Opens a new socket unless offline, destroyed, or already connecting.
    ///
    /// Counter state carries over so that the next open can replay.
    pub fn connect(&mut self, ctx: &mut SocketContext<'_>) -> Result<()> {
        if self.destroyed || !ctx.online {
            debug!(online = ctx.online, "not connecting socket");
            return Ok(());
        }
        if self.state != SocketState::Closed {
            return Ok(());
        }

        let url = socket_url(&self.websocket_url, &ctx.session.session_token())?;
        self.closing = false;
        self.last_counter = -1;
        self.reconnect_at = None;
        self.attempt += 1;
        self.state = SocketState::Connecting;
        self.connect_deadline = Some(ctx.now + self.connect_timeout);
        info!(attempt = self.attempt, "connecting socket");
        ctx.out.push(Effect::Connect {
            url,
            attempt: self.attempt,
        });
        Ok(())
    }

    /// The socket for `attempt` opened. Returns false for a stale attempt.
    pub fn on_open(&mut self, attempt: u64, ctx: &mut SocketContext<'_>) -> bool {
        if attempt != self.attempt || self.state != SocketState::Connecting {
            debug!(attempt, current = self.attempt, "ignoring stale socket");
            return false;
        }

        self.connect_deadline = None;
        self.lost_connection_count = 0;
        self.state = SocketState::Open;
        info!(attempt, "socket open");
        ctx.out.emit(ClientEvent::SocketConnected);

        let replay_from = match (self.needs_replay_from.take(), self.last_timestamp) {
            (Some(pending), Some(last)) => Some(pending.min(last)),
            (pending, last) => pending.or(last),
        };
        match replay_from {
            Some(from) if self.has_counter => self.replay_events(from, true, None, ctx),
            _ => self.schedule_ping(ctx.now),
        }
        true
    }

    /// The connect for `attempt` failed.
    pub fn on_connect_failed(&mut self, attempt: u64, ctx: &mut SocketContext<'_>) {
        if attempt != self.attempt || self.state != SocketState::Connecting {
            return;
        }
        warn!(attempt, "socket connect failed");
        self.connection_failed(ctx);
    }

    /// Processes an inbound envelope and re-emits it for routing.
    pub fn on_message(&mut self, envelope: ServerEnvelope, ctx: &mut SocketContext<'_>) {
        if self.state != SocketState::Open {
            return;
        }
        self.last_data_at = Some(ctx.now);
        self.lost_connection_count = 0;

        let mut gap_from = None;
        if let Some(counter) = envelope.counter {
            let expected = self.last_counter + 1;
            self.has_counter = true;
            self.last_counter = counter;
            if counter == expected {
                if envelope.timestamp.is_some() && !self.gap_pending {
                    self.last_timestamp = envelope.timestamp;
                }
            } else if counter > expected {
                match self.last_timestamp {
                    Some(from) => {
                        debug!(counter, expected, "counter gap");
                        self.gap_pending = true;
                        gap_from = Some(from);
                    }
                    // Nothing to replay from yet: this is where history starts.
                    None => self.last_timestamp = envelope.timestamp,
                }
            }
        }

        ctx.out.emit(ClientEvent::Message(envelope));
        if let Some(from) = gap_from {
            self.replay_events(from, false, None, ctx);
        }
        self.schedule_ping(ctx.now);
    }

    /// Asks the server to resend events since `from`.
    ///
    /// `waiter` is a reply token notified once the cache is fully caught up.
    pub fn replay_events(
        &mut self,
        from: DateTime<Utc>,
        force: bool,
        waiter: Option<u64>,
        ctx: &mut SocketContext<'_>,
    ) {
        if let Some(token) = waiter {
            self.replay_waiters.push(token);
        }
        if !ctx.online || self.state != SocketState::Open {
            self.needs_replay_from = Some(from);
            return;
        }
        if self.in_replay && !force {
            self.needs_replay_from = Some(from);
            return;
        }

        self.in_replay = true;
        self.needs_replay_from = None;
        self.replay_retry = None;
        debug!(%from, "replaying events");
        let sent = ctx.requests.send(
            RequestBody::replay(from),
            Waiter::Replay { from },
            true,
            ctx.now,
            ctx.out,
        );
        if sent.is_err() {
            self.in_replay = false;
            self.needs_replay_from = Some(from);
        }
    }

    /// Handles the end of a replay. Returns the reply tokens to notify.
    pub fn on_replay_result(
        &mut self,
        from: DateTime<Utc>,
        success: bool,
        ctx: &mut SocketContext<'_>,
    ) -> Vec<u64> {
        self.in_replay = false;
        if !success {
            warn!(%from, "replay failed, retrying");
            self.replay_retry = Some((ctx.now + self.replay_retry_delay, from));
            return Vec::new();
        }
        if let Some(next) = self.needs_replay_from.take() {
            self.replay_events(next, false, None, ctx);
            return Vec::new();
        }
        info!("caught up");
        self.gap_pending = false;
        ctx.out.emit(ClientEvent::Synced);
        std::mem::take(&mut self.replay_waiters)
    }

    /// Any answer to a ping, success or failure, schedules the next one.
    pub fn on_ping_result(&mut self, now: Instant) {
        self.schedule_ping(now);
    }

    /// The socket closed or errored without being asked to.
    pub fn on_close(&mut self, ctx: &mut SocketContext<'_>) {
        if self.state == SocketState::Closed {
            return;
        }
        let was_open = self.state == SocketState::Open;
        self.state = SocketState::Closed;
        self.clear_socket_timers();
        ctx.out.push(Effect::Disconnect);
        if was_open {
            info!("socket closed");
            ctx.out.emit(ClientEvent::SocketDisconnected);
        }
        if !self.closing {
            self.lost_connection_count = self.lost_connection_count.saturating_add(1);
            self.schedule_reconnect(ctx);
        }
    }

    /// Closes the socket and suppresses reconnects.
    pub fn close(&mut self, ctx: &mut SocketContext<'_>) {
        self.closing = true;
        self.reconnect_at = None;
        self.clear_socket_timers();
        if self.state == SocketState::Closed {
            return;
        }
        let was_open = self.state == SocketState::Open;
        self.state = SocketState::Closed;
        ctx.out.push(Effect::Disconnect);
        if was_open {
            info!("socket closed by client");
            ctx.out.emit(ClientEvent::SocketDisconnected);
        }
    }

    /// Closes and reopens the socket.
    ///
    /// With `reset`, counter and replay state are discarded so the new
    /// connection starts a fresh session instead of replaying.
    pub fn reconnect(&mut self, reset: bool, ctx: &mut SocketContext<'_>) -> Result<()> {
        self.close(ctx);
        if reset {
            self.last_counter = -1;
            self.has_counter = false;
            self.last_timestamp = None;
            self.gap_pending = false;
            self.needs_replay_from = None;
        }
        self.connect(ctx)
    }

    pub fn on_online(&mut self, reset: bool, ctx: &mut SocketContext<'_>) -> Result<()> {
        self.reconnect(reset, ctx)
    }

    pub fn on_offline(&mut self, ctx: &mut SocketContext<'_>) {
        self.close(ctx);
    }

    pub fn poll_timers(&mut self, ctx: &mut SocketContext<'_>) -> Result<()> {
        let now = ctx.now;

        if self.connect_deadline.is_some_and(|at| at <= now) {
            self.connect_deadline = None;
            if self.state == SocketState::Connecting {
                warn!(attempt = self.attempt, "socket connect timed out");
                ctx.out.push(Effect::Disconnect);
                self.connection_failed(ctx);
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.connect(ctx)?;
        }

        if self.ping_at.is_some_and(|at| at <= now) {
            self.ping_at = None;
            if self.is_open() {
                let sent = ctx.requests.send(
                    RequestBody::counter_read(),
                    Waiter::Ping,
                    true,
                    now,
                    ctx.out,
                );
                if let Err(e) = sent {
                    debug!(error = %e, "ping not sent");
                }
            }
        }

        if let Some((at, from)) = self.replay_retry {
            if at <= now {
                self.replay_retry = None;
                self.replay_events(from, true, None, ctx);
            }
        }
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.reconnect_at,
            self.ping_at,
            self.replay_retry.map(|(at, _)| at),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn destroy(&mut self, ctx: &mut SocketContext<'_>) {
        self.close(ctx);
        self.destroyed = true;
        self.replay_waiters.clear();
    }

    fn connection_failed(&mut self, ctx: &mut SocketContext<'_>) {
        self.state = SocketState::Closed;
        self.connect_deadline = None;
        self.lost_connection_count = self.lost_connection_count.saturating_add(1);
        self.schedule_reconnect(ctx);
    }

    fn schedule_reconnect(&mut self, ctx: &mut SocketContext<'_>) {
        if self.destroyed || self.closing || !ctx.online {
            return;
        }
        let attempt = self.lost_connection_count.min(MAX_RECONNECT_ATTEMPT);
        let delay = backoff_duration(self.max_reconnect_wait, attempt);
        info!(?delay, attempt, "scheduling reconnect");
        self.reconnect_at = Some(ctx.now + delay);
    }

    fn schedule_ping(&mut self, now: Instant) {
        if self.is_open() {
            self.ping_at = Some(now + self.ping_frequency);
        }
    }

    fn clear_socket_timers(&mut self) {
        self.connect_deadline = None;
        self.ping_at = None;
        self.replay_retry = None;
        self.in_replay = false;
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
