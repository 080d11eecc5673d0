// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Events observable by client subscribers.
//!
//! The engine collects events for a whole turn and folds them before
//! broadcasting: creations are merged into one event, and all changes to
//! one object are merged into one event carrying every property change.

use std::time::Duration;

use msync_core::patch::PropertyChange;
use msync_core::protocol::{ObjectRef, ServerEnvelope};
use msync_core::sync_event::{FailureClass, Operation};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connectivity returned. `reset` asks consumers to refetch instead of resyncing.
    Online {
        offline_duration: Duration,
        reset: bool,
    },
    Offline,
    SocketConnected,
    SocketDisconnected,
    /// A replay finished and the cache is caught up.
    Synced,
    /// Every inbound envelope, after gap detection.
    Message(ServerEnvelope),
    SyncAdded {
        event_id: u64,
        operation: Operation,
        target: Option<String>,
    },
    SyncSucceeded {
        event_id: u64,
        operation: Operation,
        target: Option<String>,
        data: Value,
    },
    SyncFailed {
        event_id: u64,
        operation: Operation,
        target: Option<String>,
        class: FailureClass,
        status: Option<u16>,
        data: Value,
    },
    ObjectsCreated {
        objects: Vec<ObjectRef>,
    },
    ObjectDeleted {
        object: ObjectRef,
    },
    ObjectChanged {
        id: String,
        changes: Vec<PropertyChange>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Online { .. } => "online",
            ClientEvent::Offline => "offline",
            ClientEvent::SocketConnected => "socket:connected",
            ClientEvent::SocketDisconnected => "socket:disconnected",
            ClientEvent::Synced => "synced",
            ClientEvent::Message(_) => "message",
            ClientEvent::SyncAdded { .. } => "sync:add",
            ClientEvent::SyncSucceeded { .. } => "sync:success",
            ClientEvent::SyncFailed { .. } => "sync:error",
            ClientEvent::ObjectsCreated { .. } => "objects:created",
            ClientEvent::ObjectDeleted { .. } => "object:deleted",
            ClientEvent::ObjectChanged { .. } => "object:change",
        }
    }
}

/// Folds every `ObjectsCreated` into the first one, keeping its position.
pub fn merge_created(events: Vec<ClientEvent>) -> Vec<ClientEvent> {
    let mut merged: Vec<ClientEvent> = Vec::with_capacity(events.len());
    let mut created_at: Option<usize> = None;

    for event in events {
        match event {
            ClientEvent::ObjectsCreated { objects } => match created_at {
                Some(index) => {
                    if let ClientEvent::ObjectsCreated { objects: first } = &mut merged[index] {
                        first.extend(objects);
                    }
                }
                None => {
                    created_at = Some(merged.len());
                    merged.push(ClientEvent::ObjectsCreated { objects });
                }
            },
            other => merged.push(other),
        }
    }
    merged
}

/// Folds all `ObjectChanged` events for one object into the first one.
pub fn merge_changes(events: Vec<ClientEvent>) -> Vec<ClientEvent> {
    let mut merged: Vec<ClientEvent> = Vec::with_capacity(events.len());

    for event in events {
        match event {
            ClientEvent::ObjectChanged { id, changes } => {
                let existing = merged.iter_mut().find_map(|candidate| match candidate {
                    ClientEvent::ObjectChanged {
                        id: seen,
                        changes: first,
                    } if *seen == id => Some(first),
                    _ => None,
                });
                match existing {
                    Some(first) => first.extend(changes),
                    None => merged.push(ClientEvent::ObjectChanged { id, changes }),
                }
            }
            other => merged.push(other),
        }
    }
    merged
}

/// Applies both folds.
pub fn fold_events(events: Vec<ClientEvent>) -> Vec<ClientEvent> {
    merge_changes(merge_created(events))
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
