// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::{DateTime, Utc};
use msync_core::patch::PatchOp;
use msync_core::Document;
use serde_json::json;

use crate::store::MemoryStore;

fn at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_772_000_000, 0).unwrap()
}

fn envelope(operation: ChangeOperation, object: ObjectRef, data: Value) -> ServerEnvelope {
    ServerEnvelope::change(
        1,
        at(),
        &ChangeBody {
            operation,
            object,
            data,
        },
    )
    .unwrap()
}

fn patch(object: ObjectRef, ops: Vec<PatchOp>) -> ServerEnvelope {
    envelope(ChangeOperation::Patch, object, serde_json::to_value(ops).unwrap())
}

#[test]
fn create_stores_object_and_announces_it() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    let object = ObjectRef::new("m1", "Message");

    changes
        .handle(
            &envelope(ChangeOperation::Create, object.clone(), json!({"position": 1})),
            &mut store,
            &mut out,
        )
        .unwrap();

    let document = store.get("m1").unwrap();
    assert!(document.from_websocket);
    assert_eq!(document.get("position"), Some(&json!(1)));
    assert_eq!(
        out.drain_events(),
        vec![ClientEvent::ObjectsCreated {
            objects: vec![object]
        }]
    );
}

#[test]
fn delete_removes_cached_object() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    store.insert(Document::new("m1", "Message"));
    let mut out = Outbox::new();
    let object = ObjectRef::new("m1", "Message");

    changes
        .handle(
            &envelope(ChangeOperation::Delete, object.clone(), Value::Null),
            &mut store,
            &mut out,
        )
        .unwrap();

    assert!(store.get("m1").is_none());
    assert_eq!(out.drain_events(), vec![ClientEvent::ObjectDeleted { object }]);
}

#[test]
fn delete_of_uncached_object_is_silent() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    changes
        .handle(
            &envelope(ChangeOperation::Delete, ObjectRef::new("m1", "Message"), Value::Null),
            &mut store,
            &mut out,
        )
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn patch_updates_cached_object() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut conversation = Document::new("c1", "Conversation");
    conversation
        .fields
        .insert("participants".into(), json!(["a", "b"]));
    store.insert(conversation);
    let mut out = Outbox::new();

    changes
        .handle(
            &patch(
                ObjectRef::new("c1", "Conversation"),
                vec![
                    PatchOp::remove("participants", json!("a")),
                    PatchOp::add("participants", json!("c")),
                ],
            ),
            &mut store,
            &mut out,
        )
        .unwrap();

    let document = store.get("c1").unwrap();
    assert_eq!(document.get("participants"), Some(&json!(["b", "c"])));
    assert!(!document.is_patching());

    let events = out.drain_events();
    let [ClientEvent::ObjectChanged { id, changes }] = events.as_slice() else {
        panic!("expected one change event, got {events:?}");
    };
    assert_eq!(id, "c1");
    assert_eq!(changes[0].added, vec![json!("c")]);
    assert_eq!(changes[0].removed, vec![json!("a")]);
}

#[test]
fn patch_resolves_references_through_store() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    store.insert(Document::new("c1", "Conversation"));
    let mut message = Document::new("m7", "Message");
    message.fields.insert("position".into(), json!(7));
    store.insert(message);
    let mut out = Outbox::new();

    changes
        .handle(
            &patch(
                ObjectRef::new("c1", "Conversation"),
                vec![PatchOp::set_ref("last_message", "m7")],
            ),
            &mut store,
            &mut out,
        )
        .unwrap();

    assert_eq!(
        store.get("c1").unwrap().get("last_message"),
        Some(&json!({"id": "m7", "position": 7}))
    );
}

#[test]
fn patch_counts_recipients_without_session_user() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new().with_session_user("me");
    store.insert(Document::new("m1", "Message"));
    let mut out = Outbox::new();

    changes
        .handle(
            &patch(
                ObjectRef::new("m1", "Message"),
                vec![PatchOp::set(
                    "recipient_status",
                    json!({"me": "read", "bob": "read", "eve": "delivered"}),
                )],
            ),
            &mut store,
            &mut out,
        )
        .unwrap();

    let events = out.drain_events();
    let [ClientEvent::ObjectChanged { changes, .. }] = events.as_slice() else {
        panic!("expected one change event, got {events:?}");
    };
    let counts = changes[0].recipients.unwrap();
    assert_eq!((counts.read, counts.delivered), (1, 2));
}

#[test]
fn noop_patch_emits_nothing() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut conversation = Document::new("c1", "Conversation");
    conversation.fields.insert("title".into(), json!("x"));
    store.insert(conversation);
    let mut out = Outbox::new();

    changes
        .handle(
            &patch(
                ObjectRef::new("c1", "Conversation"),
                vec![PatchOp::set("title", json!("x"))],
            ),
            &mut store,
            &mut out,
        )
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn patch_for_uncached_conversation_loads_it() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    let object = ObjectRef::new("layer:///conversations/c9", "Conversation");

    changes
        .handle(
            &patch(object.clone(), vec![PatchOp::set("title", json!("hi"))]),
            &mut store,
            &mut out,
        )
        .unwrap();

    assert_eq!(
        out.drain(),
        vec![Effect::Http {
            purpose: HttpPurpose::Load(object),
            request: HttpRequest::get("/conversations/c9"),
        }]
    );
}

#[test]
fn patch_for_uncached_message_is_dropped() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    changes
        .handle(
            &patch(ObjectRef::new("m1", "Message"), vec![PatchOp::delete("x")]),
            &mut store,
            &mut out,
        )
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn failed_patch_leaves_object_untouched() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut conversation = Document::new("c1", "Conversation");
    conversation.fields.insert("title".into(), json!("x"));
    store.insert(conversation);
    let mut out = Outbox::new();

    let result = changes.handle(
        &patch(
            ObjectRef::new("c1", "Conversation"),
            vec![
                PatchOp::set("title", json!("y")),
                PatchOp::set("title.deep", json!(1)),
            ],
        ),
        &mut store,
        &mut out,
    );
    assert!(result.is_err());
    assert_eq!(store.get("c1").unwrap().get("title"), Some(&json!("x")));
    assert!(out.is_empty());
}

#[test]
fn non_change_envelopes_are_ignored() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    let envelope = ServerEnvelope {
        kind: EnvelopeKind::Signal,
        counter: None,
        timestamp: None,
        body: json!({"type": "typing_indicator"}),
    };
    changes.handle(&envelope, &mut store, &mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn load_result_creates_object() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    let object = ObjectRef::new("c9", "Conversation");

    changes
        .on_load_result(
            &object,
            &HttpResponse::new(200, json!({"id": "c9", "title": "hi"})),
            &mut store,
            &mut out,
        )
        .unwrap();
    let document = store.get("c9").unwrap();
    assert!(!document.from_websocket);
    assert_eq!(document.get("title"), Some(&json!("hi")));
    assert_eq!(out.drain_events().len(), 1);

    changes
        .on_load_result(
            &ObjectRef::new("c10", "Conversation"),
            &HttpResponse::new(404, Value::Null),
            &mut store,
            &mut out,
        )
        .unwrap();
    assert!(store.get("c10").is_none());
    assert!(out.is_empty());
}
