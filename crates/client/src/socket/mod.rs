// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The socket side of the client: connection lifecycle, request
//! correlation, and server-pushed changes.

mod changes;
mod connection;
mod requests;

pub use changes::ChangeManager;
pub use connection::{socket_url, ConnectionManager, SocketContext, SocketState};
pub use requests::{
    not_connected_data, timeout_data, RequestCompletion, RequestManager, SweepOutcome, Waiter,
};
