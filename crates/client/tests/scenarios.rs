// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven through the public managers, with the test
//! standing in for the engine: it executes effects by hand and feeds
//! results back.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use msync::config::{RequestConfig, SocketConfig, SyncConfig};
use msync::outbox::{Effect, HttpPurpose, Outbox};
use msync::socket::{
    ChangeManager, ConnectionManager, RequestManager, SocketContext, SweepOutcome, Waiter,
};
use msync::store::{MemoryStore, ObjectStore, StaticSession};
use msync::sync::{SyncContext, SyncManager, SyncResult};
use msync::{ClientConfig, ClientEvent, OnlineStateManager};
use msync_core::http::{HttpMethod, HttpRequest, HttpResponse};
use msync_core::protocol::{
    ChangeBody, ChangeOperation, ClientEnvelope, ObjectRef, ServerEnvelope,
};
use msync_core::sync_event::{Operation, SyncEvent, SyncOutcome};
use serde_json::{json, Value};
use tokio::time::Instant;

const ONLINE: SyncContext = SyncContext {
    online: true,
    socket_open: true,
};

fn ts(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_772_000_000 + seconds, 0).unwrap()
}

/// Event ids of the sync requests fired since the last drain.
fn fired(out: &mut Outbox) -> Vec<u64> {
    out.drain()
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Http {
                purpose: HttpPurpose::Sync { event_id },
                ..
            } => Some(event_id),
            _ => None,
        })
        .collect()
}

fn post(url: &str) -> SyncEvent {
    SyncEvent::xhr(Operation::Post, HttpRequest::new(HttpMethod::Post, url))
}

#[test]
fn created_object_id_flows_to_later_patch() {
    let mut sync = SyncManager::new(&SyncConfig::default());
    let mut out = Outbox::new();
    let now = Instant::now();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);

    let create = sync
        .request(
            post("/conversations").with_callback(move |outcome: &SyncOutcome| {
                sink.lock().unwrap().push(outcome.clone())
            }),
            ONLINE,
            &mut out,
        )
        .unwrap()
        .unwrap();
    let patch = SyncEvent::xhr(
        Operation::Patch,
        HttpRequest::new(HttpMethod::Patch, "/conversations/X"),
    )
    .with_target("X");
    let patch = sync.request(patch, ONLINE, &mut out).unwrap().unwrap();
    assert_eq!(fired(&mut out), vec![create]);

    sync.on_result(
        create,
        SyncResult::from_http(&HttpResponse::new(200, json!({"id": "X"}))),
        now,
        ONLINE,
        &mut out,
    );
    let outcomes = outcomes.lock().unwrap();
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].data(), &json!({"id": "X"}));
    assert_eq!(fired(&mut out), vec![patch]);
}

#[test]
fn unavailable_server_is_retried_twice_then_succeeds() {
    let mut sync = SyncManager::new(&SyncConfig::default()).with_jitter(|| 0.5);
    let mut out = Outbox::new();
    let mut now = Instant::now();
    let id = sync.request(post("/messages"), ONLINE, &mut out).unwrap().unwrap();
    out.drain();

    let mut delays = Vec::new();
    for _ in 0..2 {
        sync.on_result(
            id,
            SyncResult::from_http(&HttpResponse::new(503, Value::Null)),
            now,
            ONLINE,
            &mut out,
        );
        let retry_at = sync.next_deadline().unwrap();
        delays.push(retry_at - now);
        now = retry_at;
        sync.poll_timers(now, ONLINE, &mut out);
        assert_eq!(fired(&mut out), vec![id]);
    }
    assert!(delays[1] > delays[0], "{delays:?}");

    sync.on_result(
        id,
        SyncResult::from_http(&HttpResponse::new(200, json!({}))),
        now,
        ONLINE,
        &mut out,
    );
    assert!(sync.is_empty());
    assert_eq!(sync.next_deadline(), None);
}

#[test]
fn queue_never_has_two_events_in_flight() {
    let mut sync = SyncManager::new(&SyncConfig::default()).with_jitter(|| 0.0);
    let mut out = Outbox::new();
    let mut now = Instant::now();
    for n in 0..5 {
        sync.request(post(&format!("/messages/{n}")), ONLINE, &mut out)
            .unwrap();
        assert!(sync.firing_count() <= 1);
    }

    let statuses = [503, 200, 502, 200, 200, 404, 200];
    for status in statuses {
        let Some(head) = sync.queue().first().map(|event| event.id) else {
            break;
        };
        if !sync.queue()[0].firing {
            now += Duration::from_secs(60);
            sync.poll_timers(now, ONLINE, &mut out);
        }
        sync.on_result(
            head,
            SyncResult::from_http(&HttpResponse::new(status, Value::Null)),
            now,
            ONLINE,
            &mut out,
        );
        assert!(sync.firing_count() <= 1);
    }
    assert!(sync.is_empty());
}

#[test]
fn delete_purges_dependents_before_they_fire() {
    let mut sync = SyncManager::new(&SyncConfig::default());
    let mut out = Outbox::new();
    let fired_dependent = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&fired_dependent);

    sync.request(post("/first"), ONLINE, &mut out).unwrap();
    sync.request(
        post("/messages")
            .with_depends(["c1"])
            .with_callback(move |_: &SyncOutcome| *flag.lock().unwrap() = true),
        ONLINE,
        &mut out,
    )
    .unwrap();
    let delete = SyncEvent::xhr(
        Operation::Delete,
        HttpRequest::new(HttpMethod::Delete, "/conversations/c1"),
    )
    .with_target("c1");
    sync.request(delete, ONLINE, &mut out).unwrap();

    assert_eq!(sync.len(), 2);
    assert!(!*fired_dependent.lock().unwrap());
}

#[test]
fn pushed_message_is_created_and_resolvable() {
    let changes = ChangeManager::default();
    let mut store = MemoryStore::new();
    let mut out = Outbox::new();
    let object = ObjectRef::new("layer:///messages/m1", "Message");
    let envelope = ServerEnvelope::change(
        7,
        ts(7),
        &ChangeBody {
            operation: ChangeOperation::Create,
            object: object.clone(),
            data: json!({"id": "layer:///messages/m1", "parts": []}),
        },
    )
    .unwrap();

    changes.handle(&envelope, &mut store, &mut out).unwrap();

    assert!(store.get("layer:///messages/m1").unwrap().from_websocket);
    assert_eq!(
        store.resolve_reference("layer:///messages/m1"),
        Some(json!({"id": "layer:///messages/m1", "parts": []}))
    );
    assert_eq!(
        out.drain_events(),
        vec![ClientEvent::ObjectsCreated {
            objects: vec![object]
        }]
    );
}

#[test]
fn sweep_times_out_only_stale_requests() {
    let config = RequestConfig::default();
    let mut requests = RequestManager::new(&config);
    let mut out = Outbox::new();
    let start = Instant::now();

    requests
        .send(
            msync_core::protocol::RequestBody::new("Conversation.mark_all_read"),
            Waiter::External { token: 1 },
            true,
            start,
            &mut out,
        )
        .unwrap();
    let later = start + config.timeout() - Duration::from_secs(10);
    let fresh = requests
        .send(
            msync_core::protocol::RequestBody::new("Message.receipt"),
            Waiter::External { token: 2 },
            true,
            later,
            &mut out,
        )
        .unwrap();

    let now = start + config.timeout();
    let outcome = requests.sweep(now, Some(now - Duration::from_secs(5)), true);
    let SweepOutcome::TimedOut(completions) = outcome else {
        panic!("expected a timeout, got {outcome:?}");
    };
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].waiter, Waiter::External { token: 1 });
    assert!(!completions[0].success);
    assert_eq!(completions[0].data["id"], "request_timeout");
    assert_eq!(requests.len(), 1);
    assert!(requests.contains(&fresh));
}

#[test]
fn counter_gap_replays_once_from_last_contiguous_message() {
    let mut connection = ConnectionManager::new("wss://ws.test/", &SocketConfig::default());
    let mut requests = RequestManager::new(&RequestConfig::default());
    let session = StaticSession::new("token");
    let mut out = Outbox::new();
    let now = Instant::now();
    let mut ctx = SocketContext {
        now,
        online: true,
        session: &session,
        requests: &mut requests,
        out: &mut out,
    };

    connection.connect(&mut ctx).unwrap();
    let attempt = connection.attempt();
    assert!(connection.on_open(attempt, &mut ctx));
    for counter in [1, 2, 4, 5] {
        let envelope = ServerEnvelope::change(
            counter,
            ts(counter),
            &ChangeBody {
                operation: ChangeOperation::Delete,
                object: ObjectRef::new("c1", "Conversation"),
                data: Value::Null,
            },
        )
        .unwrap();
        connection.on_message(envelope, &mut ctx);
    }

    assert_eq!(connection.last_timestamp(), Some(ts(2)));
    let replays: Vec<_> = ctx
        .out
        .drain()
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Send(ClientEnvelope::Request(body)) if body.method == "Event.replay" => {
                Some(body)
            }
            _ => None,
        })
        .collect();
    assert_eq!(replays.len(), 1);
    let from = replays[0].data.as_ref().unwrap()["from_timestamp"]
        .as_str()
        .unwrap()
        .parse::<DateTime<Utc>>()
        .unwrap();
    assert_eq!(from, ts(2));

    // The socket drops before the replay answers: reopening replays from
    // the same point.
    connection.on_close(&mut ctx);
    ctx.requests.clear();
    ctx.out.drain();
    connection.connect(&mut ctx).unwrap();
    let attempt = connection.attempt();
    assert!(connection.on_open(attempt, &mut ctx));
    let reopened: Vec<_> = ctx
        .out
        .drain()
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Send(ClientEnvelope::Request(body)) if body.method == "Event.replay" => {
                Some(body)
            }
            _ => None,
        })
        .collect();
    assert_eq!(reopened.len(), 1);
    assert_eq!(
        reopened[0].data.as_ref().unwrap()["from_timestamp"],
        "2026-02-25T06:13:22.000Z"
    );
}

#[test]
fn going_offline_twice_reports_once() {
    let config = ClientConfig::new("https://api.test", "wss://ws.test/");
    let mut online = OnlineStateManager::new(&config);
    let mut out = Outbox::new();
    let now = Instant::now();
    online.start(now, &mut out);

    online.on_transport_signal(false, now, &mut out);
    online.on_transport_signal(false, now + Duration::from_secs(1), &mut out);

    let offline = out
        .drain_events()
        .into_iter()
        .filter(|event| *event == ClientEvent::Offline)
        .count();
    assert_eq!(offline, 1);
    assert!(!online.is_online());
}
