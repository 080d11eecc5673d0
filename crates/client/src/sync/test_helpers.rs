// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory transports for tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use msync_core::http::{HttpRequest, HttpResponse};
use msync_core::protocol::{ClientEnvelope, RequestBody, ResponseBody, ServerEnvelope};
use serde_json::Value;
use tokio::sync::mpsc;

use super::transport::{
    HttpTransport, SocketFactory, SocketTransport, TransportError, TransportFuture,
    TransportResult,
};

#[derive(Default)]
struct ServerState {
    connects: usize,
    urls: Vec<String>,
    fail_connects: usize,
    sent: Vec<ClientEnvelope>,
    /// Frames for the live connection; `None` closes it.
    peer: Option<mpsc::UnboundedSender<Option<ServerEnvelope>>>,
}

/// A fake socket server. Every socket from [`MockServer::factory`] talks to it.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> SocketFactory {
        let server = self.clone();
        Arc::new(move || {
            Box::new(MockSocket {
                server: server.clone(),
                rx: None,
            }) as Box<dyn SocketTransport>
        })
    }

    /// Makes the next `count` connects fail.
    pub fn fail_connects(&self, count: usize) {
        self.state.lock().unwrap().fail_connects = count;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .peer
            .as_ref()
            .is_some_and(|peer| !peer.is_closed())
    }

    /// Delivers a frame on the live connection.
    pub fn push(&self, envelope: ServerEnvelope) {
        if let Some(peer) = &self.state.lock().unwrap().peer {
            let _ = peer.send(Some(envelope));
        }
    }

    /// Closes the live connection from the server side.
    pub fn close(&self) {
        if let Some(peer) = self.state.lock().unwrap().peer.take() {
            let _ = peer.send(None);
        }
    }

    pub fn sent(&self) -> Vec<ClientEnvelope> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Requests sent so far with the given method.
    pub fn requests(&self, method: &str) -> Vec<RequestBody> {
        self.sent()
            .into_iter()
            .filter_map(|envelope| match envelope {
                ClientEnvelope::Request(body) if body.method == method => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Answers a request with a response envelope carrying no counter.
    pub fn respond(&self, request_id: &str, success: bool, data: Value) {
        let body = ResponseBody {
            request_id: request_id.to_string(),
            success,
            data,
        };
        self.push(ServerEnvelope {
            kind: msync_core::protocol::EnvelopeKind::Response,
            counter: None,
            timestamp: None,
            body: serde_json::to_value(body).unwrap(),
        });
    }
}

struct MockSocket {
    server: MockServer,
    rx: Option<mpsc::UnboundedReceiver<Option<ServerEnvelope>>>,
}

impl SocketTransport for MockSocket {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, TransportResult<()>> {
        let url = url.to_string();
        Box::pin(async move {
            let mut state = self.server.state.lock().unwrap();
            state.connects += 1;
            state.urls.push(url);
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(TransportError::ConnectionFailed("mock failure".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.peer = Some(tx);
            self.rx = Some(rx);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.rx = None;
            Ok(())
        })
    }

    fn send(&mut self, envelope: ClientEnvelope) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            if self.rx.is_none() {
                return Err(TransportError::ConnectionClosed);
            }
            self.server.state.lock().unwrap().sent.push(envelope);
            Ok(())
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, TransportResult<Option<ServerEnvelope>>> {
        Box::pin(async move {
            let rx = self.rx.as_mut().ok_or(TransportError::ConnectionClosed)?;
            match rx.recv().await {
                Some(Some(envelope)) => Ok(Some(envelope)),
                Some(None) | None => {
                    self.rx = None;
                    Ok(None)
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.rx.is_some()
    }
}

type Responder = Box<dyn FnMut(&HttpRequest) -> HttpResponse + Send>;

/// A fake REST server answering through a closure, or from a script of
/// canned responses when one is queued.
#[derive(Clone)]
pub struct MockHttp {
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    script: Arc<Mutex<VecDeque<HttpResponse>>>,
    responder: Arc<Mutex<Responder>>,
}

impl MockHttp {
    /// Answers every request with 200 and an empty object.
    pub fn new() -> Self {
        Self::with_responder(|_| HttpResponse::new(200, serde_json::json!({})))
    }

    pub fn with_responder(
        responder: impl FnMut(&HttpRequest) -> HttpResponse + Send + 'static,
    ) -> Self {
        MockHttp {
            requests: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            responder: Arc::new(Mutex::new(Box::new(responder))),
        }
    }

    /// Queues a response for the next request.
    pub fn enqueue(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.ends_with(suffix))
            .collect()
    }
}

impl HttpTransport for MockHttp {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_, HttpResponse> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(response) = self.script.lock().unwrap().pop_front() {
                return response;
            }
            let mut responder = self.responder.lock().unwrap();
            (*responder)(&request)
        })
    }
}
