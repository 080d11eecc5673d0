// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound sync: the mutation queue and the transports it fires through.

mod manager;
mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use manager::{SyncContext, SyncManager, SyncResult};
pub use transport::{
    HttpTransport, ReqwestTransport, SocketFactory, SocketTransport, TransportError,
    TransportFuture, TransportResult, WebSocketTransport,
};
