// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Online state tracking.
//!
//! Connectivity is learned two ways: passively, from the outcome of every
//! REST request and socket connect, and actively, by polling a test URL.
//! While online the poll runs every `ping_frequency`; while offline it backs
//! off exponentially up to `max_offline_wait`.

use std::time::Duration;

use msync_core::backoff::backoff_duration;
use msync_core::http::HttpRequest;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::events::ClientEvent;
use crate::outbox::{Effect, HttpPurpose, Outbox};

/// Cap on the attempt count fed to the offline backoff.
const MAX_OFFLINE_ATTEMPT: u32 = 10;

/// Who is waiting for an active connectivity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckWaiter {
    /// A caller of `Client::check_online_status`, keyed by reply token.
    External(u64),
    /// The sync manager validating connectivity before a retry.
    Sync { event_id: u64 },
}

/// A change of online state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Online {
        offline_duration: Duration,
        /// The client was offline long enough that cached state is stale.
        reset: bool,
    },
    Offline,
}

/// Outcome of an active check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub online: bool,
    pub transition: Option<Transition>,
    pub waiters: Vec<CheckWaiter>,
}

pub struct OnlineStateManager {
    ping_frequency: Duration,
    max_offline_wait: f64,
    reset_after: Duration,
    test_url: String,
    is_online: bool,
    started_once: bool,
    running: bool,
    offline_counter: u32,
    offline_since: Option<Instant>,
    next_check: Option<Instant>,
    check_in_flight: bool,
    waiters: Vec<CheckWaiter>,
}

/// A check succeeds when the server answered with anything but a timeout.
pub fn is_reachable(status: Option<u16>) -> bool {
    matches!(status, Some(code) if code != 408)
}

impl OnlineStateManager {
    pub fn new(config: &ClientConfig) -> Self {
        OnlineStateManager {
            ping_frequency: config.online.ping_frequency(),
            max_offline_wait: config.online.max_offline_wait_secs as f64,
            reset_after: config.online.reset_after(),
            test_url: config.test_url(),
            is_online: false,
            started_once: false,
            running: false,
            offline_counter: 0,
            offline_since: None,
            next_check: None,
            check_in_flight: false,
            waiters: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Consecutive offline checks scheduled since the last time online.
    pub fn offline_counter(&self) -> u32 {
        self.offline_counter
    }

    /// Marks the client online and starts polling.
    ///
    /// The first start assumes fresh state and stays silent; later starts
    /// report a zero-length offline period.
    pub fn start(&mut self, now: Instant, out: &mut Outbox) -> Option<Transition> {
        let first = !self.started_once;
        self.started_once = true;
        self.running = true;
        self.is_online = true;
        self.offline_counter = 0;
        self.offline_since = None;
        self.schedule_next_check(now);

        if first {
            return None;
        }
        let transition = Transition::Online {
            offline_duration: Duration::ZERO,
            reset: false,
        };
        out.emit(ClientEvent::Online {
            offline_duration: Duration::ZERO,
            reset: false,
        });
        Some(transition)
    }

    /// Marks the client offline and stops polling.
    pub fn stop(&mut self, now: Instant, out: &mut Outbox) -> Option<Transition> {
        self.running = false;
        self.next_check = None;
        self.go_offline(now, out)
    }

    /// Starts an active check unless one is already running.
    pub fn check_online_status(
        &mut self,
        waiter: Option<CheckWaiter>,
        _now: Instant,
        out: &mut Outbox,
    ) {
        if let Some(waiter) = waiter {
            self.waiters.push(waiter);
        }
        if self.check_in_flight {
            return;
        }
        self.check_in_flight = true;
        self.next_check = None;
        out.push(Effect::Http {
            purpose: HttpPurpose::OnlineCheck,
            request: HttpRequest::get(&self.test_url),
        });
    }

    /// Applies the result of an active check.
    pub fn on_check_result(
        &mut self,
        status: Option<u16>,
        now: Instant,
        out: &mut Outbox,
    ) -> CheckResult {
        self.check_in_flight = false;
        let online = is_reachable(status);
        debug!(online, ?status, "online check finished");
        let transition = if self.running {
            self.apply(online, now, out)
        } else {
            None
        };
        self.schedule_next_check(now);
        CheckResult {
            online,
            transition,
            waiters: std::mem::take(&mut self.waiters),
        }
    }

    /// Applies a passive signal from request traffic.
    pub fn on_transport_signal(
        &mut self,
        success: bool,
        now: Instant,
        out: &mut Outbox,
    ) -> Option<Transition> {
        if !self.running {
            return None;
        }
        let transition = self.apply(success, now, out);
        self.schedule_next_check(now);
        transition
    }

    pub fn poll_timers(&mut self, now: Instant, out: &mut Outbox) {
        if self.next_check.is_some_and(|at| at <= now) {
            self.next_check = None;
            self.check_online_status(None, now, out);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_check
    }

    pub fn destroy(&mut self) {
        self.running = false;
        self.next_check = None;
        self.waiters.clear();
    }

    fn apply(&mut self, online: bool, now: Instant, out: &mut Outbox) -> Option<Transition> {
        if !online {
            return self.go_offline(now, out);
        }
        if self.is_online {
            return None;
        }

        let offline_duration = self
            .offline_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO);
        let reset = offline_duration > self.reset_after;
        self.is_online = true;
        self.offline_counter = 0;
        self.offline_since = None;
        info!(?offline_duration, reset, "back online");
        out.emit(ClientEvent::Online {
            offline_duration,
            reset,
        });
        Some(Transition::Online {
            offline_duration,
            reset,
        })
    }

    fn go_offline(&mut self, now: Instant, out: &mut Outbox) -> Option<Transition> {
        if !self.is_online {
            return None;
        }
        self.is_online = false;
        self.offline_since = Some(now);
        info!("offline");
        out.emit(ClientEvent::Offline);
        Some(Transition::Offline)
    }

    fn schedule_next_check(&mut self, now: Instant) {
        if !self.running || self.check_in_flight {
            return;
        }
        let wait = if self.is_online {
            self.ping_frequency
        } else {
            let attempt = self.offline_counter.min(MAX_OFFLINE_ATTEMPT);
            self.offline_counter = self.offline_counter.saturating_add(1);
            backoff_duration(self.max_offline_wait, attempt)
        };
        self.next_check = Some(now + wait);
    }
}

#[cfg(test)]
#[path = "online_tests.rs"]
mod tests;
