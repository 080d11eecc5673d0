// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Side effects requested by the managers.
//!
//! Managers never perform I/O. They push [`Effect`]s into an [`Outbox`],
//! and the engine executes them in order between turns.

use std::collections::VecDeque;

use msync_core::http::HttpRequest;
use msync_core::protocol::{ClientEnvelope, ObjectRef, RequestBody};

use crate::events::ClientEvent;
use crate::online::CheckWaiter;
use crate::socket::Waiter;

/// Who receives the response to an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpPurpose {
    OnlineCheck,
    Sync { event_id: u64 },
    /// Full load of an object that a patch targeted before it was cached.
    Load(ObjectRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a socket; the result is reported back tagged with `attempt`.
    Connect { url: String, attempt: u64 },
    /// Drop the socket and abandon any connect in progress.
    Disconnect,
    /// Write a frame to the open socket.
    Send(ClientEnvelope),
    /// Send a socket request through the request manager.
    Request { body: RequestBody, waiter: Waiter },
    Http {
        purpose: HttpPurpose,
        request: HttpRequest,
    },
    CheckOnline(CheckWaiter),
    Emit(ClientEvent),
}

#[derive(Debug, Default)]
pub struct Outbox {
    effects: VecDeque<Effect>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push_back(effect);
    }

    pub fn emit(&mut self, event: ClientEvent) {
        self.push(Effect::Emit(event));
    }

    pub fn pop(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Removes and returns every queued effect.
    pub fn drain(&mut self) -> Vec<Effect> {
        self.effects.drain(..).collect()
    }

    /// Removes every queued effect, returning only the emitted events.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.drain()
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Emit(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}
