// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;

fn created(id: &str) -> ClientEvent {
    ClientEvent::ObjectsCreated {
        objects: vec![ObjectRef::new(id, "Message")],
    }
}

fn change(id: &str, property: &str) -> ClientEvent {
    ClientEvent::ObjectChanged {
        id: id.to_string(),
        changes: vec![PropertyChange {
            property: property.to_string(),
            old_value: Value::Null,
            new_value: json!(1),
            added: Vec::new(),
            removed: Vec::new(),
            recipients: None,
        }],
    }
}

#[test]
fn created_events_fold_into_first_position() {
    let events = vec![
        ClientEvent::SocketConnected,
        created("m1"),
        ClientEvent::Synced,
        created("m2"),
    ];
    let merged = merge_created(events);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0], ClientEvent::SocketConnected);
    assert_eq!(
        merged[1],
        ClientEvent::ObjectsCreated {
            objects: vec![
                ObjectRef::new("m1", "Message"),
                ObjectRef::new("m2", "Message")
            ]
        }
    );
    assert_eq!(merged[2], ClientEvent::Synced);
}

#[test]
fn changes_fold_per_object() {
    let events = vec![
        change("c1", "metadata"),
        change("c2", "participants"),
        change("c1", "unread_message_count"),
    ];
    let merged = merge_changes(events);
    assert_eq!(merged.len(), 2);

    let ClientEvent::ObjectChanged { id, changes } = &merged[0] else {
        panic!("expected a change event");
    };
    assert_eq!(id, "c1");
    let properties: Vec<&str> = changes.iter().map(|c| c.property.as_str()).collect();
    assert_eq!(properties, vec!["metadata", "unread_message_count"]);

    assert!(matches!(&merged[1], ClientEvent::ObjectChanged { id, .. } if id == "c2"));
}

#[test]
fn unrelated_events_pass_through_in_order() {
    let events = vec![ClientEvent::Offline, ClientEvent::SocketDisconnected];
    assert_eq!(fold_events(events.clone()), events);
}

#[test]
fn event_names() {
    assert_eq!(ClientEvent::Synced.name(), "synced");
    assert_eq!(change("c1", "x").name(), "object:change");
    assert_eq!(created("m1").name(), "objects:created");
}
