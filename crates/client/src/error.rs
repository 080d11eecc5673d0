// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::sync::TransportError;

/// Errors returned by the msync client.
///
/// Failed sync events are not errors: their outcome is delivered to the
/// event's callback and as a `SyncFailed` client event.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] msync_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("http client error: {0}")]
    Http(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket is not connected\n  hint: wait for the client to reconnect or use a REST request")]
    NotConnected,

    #[error("request abandoned: the socket closed before a response arrived")]
    RequestAbandoned,

    #[error("client engine has stopped")]
    EngineStopped,
}

/// A specialized Result type for msync client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
