// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! msync: the sync core of a messaging client.
//!
//! The client keeps a local object cache consistent with the server. It
//! queues outbound mutations and fires them one at a time with retries,
//! applies server-pushed changes to the cache, detects missed pushes and
//! replays them, and tracks whether the network is reachable.
//!
//! Every manager is synchronous and I/O free: it takes the current time,
//! updates its state, and pushes [`outbox::Effect`]s. The [`engine`] owns
//! the managers on one tokio task and performs the effects.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod online;
pub mod outbox;
pub mod socket;
pub mod store;
pub mod sync;

pub use config::ClientConfig;
pub use engine::{Client, ClientStatus, Engine, SocketResponse};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use online::OnlineStateManager;
pub use socket::{ChangeManager, ConnectionManager, RequestManager};
pub use store::{MemoryStore, ObjectStore, SessionProvider, SharedStore, StaticSession};
pub use sync::{SyncManager, SyncResult};
