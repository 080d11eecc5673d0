// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The client engine.
//!
//! A single task owns every manager. It waits on four sources with
//! `tokio::select!`: commands from [`Client`] handles, completions of
//! spawned connect and HTTP tasks, frames from the open socket, and the
//! earliest manager deadline. Each wakeup runs one manager call, then
//! executes the effects it pushed until the outbox is empty. Emitted
//! events are routed to the managers that listen for them, collected, and
//! broadcast to subscribers folded once the turn ends.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use msync_core::http::{HttpRequest, HttpResponse};
use msync_core::protocol::{ClientEnvelope, EnvelopeKind, RequestBody, ServerEnvelope};
use msync_core::sync_event::SyncEvent;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{fold_events, ClientEvent};
use crate::online::{CheckWaiter, OnlineStateManager};
use crate::outbox::{Effect, HttpPurpose, Outbox};
use crate::socket::{
    ChangeManager, ConnectionManager, RequestCompletion, RequestManager, SocketContext,
    SocketState, SweepOutcome, Waiter,
};
use crate::store::{SessionProvider, SharedStore};
use crate::sync::{
    HttpTransport, ReqwestTransport, SocketFactory, SocketTransport, SyncContext, SyncManager,
    SyncResult, TransportError, TransportResult, WebSocketTransport,
};

/// Capacity of the subscriber broadcast; slow subscribers miss old events.
const EVENT_CAPACITY: usize = 256;

/// Answer to a request sent with [`Client::send_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct SocketResponse {
    pub success: bool,
    pub data: Value,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub online: bool,
    pub socket: SocketState,
    pub queued: usize,
    pub last_counter: i64,
    pub in_replay: bool,
}

enum Command {
    Start,
    Stop,
    Request {
        event: SyncEvent,
        reply: oneshot::Sender<Result<Option<u64>>>,
    },
    Cancel {
        event_id: u64,
        reply: oneshot::Sender<bool>,
    },
    ResumeSync,
    CheckOnline {
        reply: oneshot::Sender<bool>,
    },
    Replay {
        from: DateTime<Utc>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendRequest {
        body: RequestBody,
        reply: oneshot::Sender<Result<SocketResponse>>,
    },
    Status {
        reply: oneshot::Sender<ClientStatus>,
    },
    Close,
    Shutdown,
}

/// Results of tasks the engine spawned.
enum Completion {
    Connected {
        attempt: u64,
        result: TransportResult<Box<dyn SocketTransport>>,
    },
    Http {
        purpose: HttpPurpose,
        response: HttpResponse,
    },
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Spawns an engine using WebSocket and reqwest transports.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        store: SharedStore,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Client> {
        config.validate()?;
        let http = ReqwestTransport::new(config.requests.http_timeout())?;
        Ok(Engine::spawn(
            config,
            store,
            session,
            WebSocketTransport::factory(),
            Arc::new(http),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Starts connectivity polling and opens the socket.
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Stops connectivity polling and takes the client offline.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Queues an outbound mutation. Returns `None` when it was merged away.
    pub async fn request(&self, event: SyncEvent) -> Result<Option<u64>> {
        self.call(|reply| Command::Request { event, reply }).await?
    }

    /// Removes a queued event that is not in flight.
    pub async fn cancel(&self, event_id: u64) -> Result<bool> {
        self.call(|reply| Command::Cancel { event_id, reply }).await
    }

    /// Refires the queue after the caller reauthenticated.
    pub fn resume_sync(&self) -> Result<()> {
        self.send(Command::ResumeSync)
    }

    /// Runs an active connectivity check.
    pub async fn check_online_status(&self) -> Result<bool> {
        self.call(|reply| Command::CheckOnline { reply }).await
    }

    /// Replays server events since `from`; resolves once the cache caught up.
    pub async fn replay_events(&self, from: DateTime<Utc>) -> Result<()> {
        self.call(|reply| Command::Replay { from, reply }).await?
    }

    /// Sends an RPC over the socket and waits for its response.
    pub async fn send_request(&self, body: RequestBody) -> Result<SocketResponse> {
        self.call(|reply| Command::SendRequest { body, reply })
            .await?
    }

    pub async fn status(&self) -> Result<ClientStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Closes the socket without reconnecting.
    pub fn close(&self) -> Result<()> {
        self.send(Command::Close)
    }

    /// Stops the engine. Pending calls fail with [`Error::EngineStopped`].
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::EngineStopped)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| Error::EngineStopped)
    }
}

pub struct Engine {
    config: ClientConfig,
    online: OnlineStateManager,
    connection: ConnectionManager,
    requests: RequestManager,
    changes: ChangeManager,
    sync: SyncManager,
    out: Outbox,

    store: SharedStore,
    session: Arc<dyn SessionProvider>,
    socket_factory: SocketFactory,
    http: Arc<dyn HttpTransport>,
    socket: Option<Box<dyn SocketTransport>>,
    connect_cancel: Option<CancellationToken>,
    completions: mpsc::UnboundedSender<Completion>,
    events: broadcast::Sender<ClientEvent>,

    next_token: u64,
    check_replies: HashMap<u64, oneshot::Sender<bool>>,
    replay_replies: HashMap<u64, oneshot::Sender<Result<()>>>,
    request_replies: HashMap<u64, oneshot::Sender<Result<SocketResponse>>>,
}

impl Engine {
    /// Spawns the engine task with the given transports.
    pub fn spawn(
        config: ClientConfig,
        store: SharedStore,
        session: Arc<dyn SessionProvider>,
        socket_factory: SocketFactory,
        http: Arc<dyn HttpTransport>,
    ) -> Client {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = Engine {
            online: OnlineStateManager::new(&config),
            connection: ConnectionManager::new(config.websocket_url.clone(), &config.socket),
            requests: RequestManager::new(&config.requests),
            changes: ChangeManager::default(),
            sync: SyncManager::new(&config.sync),
            out: Outbox::new(),
            config,
            store,
            session,
            socket_factory,
            http,
            socket: None,
            connect_cancel: None,
            completions: completion_tx,
            events: events.clone(),
            next_token: 0,
            check_replies: HashMap::new(),
            replay_replies: HashMap::new(),
            request_replies: HashMap::new(),
        };
        tokio::spawn(engine.run(command_rx, completion_rx));

        Client {
            commands: command_tx,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("engine started");
        loop {
            let deadline = self.next_deadline();
            let result = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                frame = recv_frame(&mut self.socket) => {
                    self.on_frame(frame);
                    Ok(())
                }
                _ = sleep_until(deadline) => self.poll_timers(),
            };
            if let Err(e) = result {
                warn!(error = %e, "engine step failed");
            }
            self.flush().await;
        }

        self.destroy();
        self.flush().await;
        info!("engine stopped");
    }

    fn on_command(&mut self, command: Command) -> Result<()> {
        let now = Instant::now();
        match command {
            Command::Start => {
                // A first start is silent; later starts emit Online, which reconnects.
                if self.online.start(now, &mut self.out).is_none() {
                    self.with_socket(now, |connection, ctx| connection.connect(ctx))?;
                }
            }
            // Offline routes to the connection manager, which closes the socket.
            Command::Stop => {
                self.online.stop(now, &mut self.out);
            }
            Command::Request { event, reply } => {
                let ctx = self.sync_context();
                let _ = reply.send(self.sync.request(event, ctx, &mut self.out));
            }
            Command::Cancel { event_id, reply } => {
                let ctx = self.sync_context();
                let _ = reply.send(self.sync.cancel(event_id, ctx, &mut self.out));
            }
            Command::ResumeSync => {
                let ctx = self.sync_context();
                self.sync.resume(ctx, &mut self.out);
            }
            Command::CheckOnline { reply } => {
                let token = self.token();
                self.check_replies.insert(token, reply);
                self.online
                    .check_online_status(Some(CheckWaiter::External(token)), now, &mut self.out);
            }
            Command::Replay { from, reply } => {
                let token = self.token();
                self.replay_replies.insert(token, reply);
                self.with_socket(now, |connection, ctx| {
                    connection.replay_events(from, false, Some(token), ctx)
                });
            }
            Command::SendRequest { body, reply } => {
                let token = self.token();
                self.request_replies.insert(token, reply);
                self.out.push(Effect::Request {
                    body,
                    waiter: Waiter::External { token },
                });
            }
            Command::Status { reply } => {
                let _ = reply.send(ClientStatus {
                    online: self.online.is_online(),
                    socket: self.connection.state(),
                    queued: self.sync.len(),
                    last_counter: self.connection.last_counter(),
                    in_replay: self.connection.in_replay(),
                });
            }
            Command::Close => self.with_socket(now, |connection, ctx| connection.close(ctx)),
            Command::Shutdown => {}
        }
        Ok(())
    }

    fn on_completion(&mut self, completion: Completion) -> Result<()> {
        let now = Instant::now();
        match completion {
            Completion::Connected { attempt, result } => match result {
                Ok(socket) => {
                    let opened =
                        self.with_socket(now, |connection, ctx| connection.on_open(attempt, ctx));
                    if opened {
                        self.socket = Some(socket);
                    } else {
                        close_in_background(socket);
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "socket connect failed");
                    self.with_socket(now, |connection, ctx| {
                        connection.on_connect_failed(attempt, ctx)
                    });
                }
            },
            Completion::Http { purpose, response } => self.on_http(purpose, response, now)?,
        }
        Ok(())
    }

    fn on_http(&mut self, purpose: HttpPurpose, response: HttpResponse, now: Instant) -> Result<()> {
        match purpose {
            HttpPurpose::OnlineCheck => {
                let result = self.online.on_check_result(response.status, now, &mut self.out);
                for waiter in result.waiters {
                    match waiter {
                        CheckWaiter::External(token) => {
                            if let Some(reply) = self.check_replies.remove(&token) {
                                let _ = reply.send(result.online);
                            }
                        }
                        CheckWaiter::Sync { event_id } => {
                            let ctx = self.sync_context();
                            self.sync
                                .on_online_check(event_id, result.online, ctx, &mut self.out);
                        }
                    }
                }
            }
            HttpPurpose::Sync { event_id } => {
                self.online
                    .on_transport_signal(!response.is_offline(), now, &mut self.out);
                let ctx = self.sync_context();
                self.sync.on_result(
                    event_id,
                    SyncResult::from_http(&response),
                    now,
                    ctx,
                    &mut self.out,
                );
            }
            HttpPurpose::Load(object) => {
                self.online
                    .on_transport_signal(!response.is_offline(), now, &mut self.out);
                let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
                self.changes
                    .on_load_result(&object, &response, &mut *store, &mut self.out)?;
            }
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: TransportResult<Option<ServerEnvelope>>) {
        let now = Instant::now();
        match frame {
            Ok(Some(envelope)) => {
                self.with_socket(now, |connection, ctx| connection.on_message(envelope, ctx))
            }
            Err(TransportError::SerializationError(e)) => {
                warn!(error = %e, "dropping unreadable frame");
            }
            Ok(None) => self.with_socket(now, |connection, ctx| connection.on_close(ctx)),
            Err(e) => {
                warn!(error = %e, "socket failed");
                self.with_socket(now, |connection, ctx| connection.on_close(ctx));
            }
        }
    }

    fn poll_timers(&mut self) -> Result<()> {
        let now = Instant::now();
        self.online.poll_timers(now, &mut self.out);
        self.with_socket(now, |connection, ctx| connection.poll_timers(ctx))?;
        let ctx = self.sync_context();
        self.sync.poll_timers(now, ctx, &mut self.out);

        match self.requests.sweep(
            now,
            self.connection.last_data_at(),
            self.connection.is_open(),
        ) {
            SweepOutcome::Idle => {}
            SweepOutcome::Reconnect => {
                self.with_socket(now, |connection, ctx| connection.reconnect(false, ctx))?
            }
            SweepOutcome::TimedOut(completions) => {
                for completion in completions {
                    self.complete(completion, now);
                }
            }
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.online.next_deadline(),
            self.connection.next_deadline(),
            self.requests.next_deadline(),
            self.sync.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Executes queued effects until none are left, then broadcasts the
    /// folded events of the turn.
    async fn flush(&mut self) {
        let mut emitted = Vec::new();
        while let Some(effect) = self.out.pop() {
            let now = Instant::now();
            let result = match effect {
                Effect::Connect { url, attempt } => {
                    self.spawn_connect(url, attempt);
                    Ok(())
                }
                Effect::Disconnect => {
                    self.drop_socket();
                    Ok(())
                }
                Effect::Send(envelope) => {
                    self.send_frame(envelope, now).await;
                    Ok(())
                }
                Effect::Request { body, waiter } => {
                    self.send_request(body, waiter, now);
                    Ok(())
                }
                Effect::Http { purpose, request } => {
                    self.spawn_http(purpose, request);
                    Ok(())
                }
                Effect::CheckOnline(waiter) => {
                    self.online
                        .check_online_status(Some(waiter), now, &mut self.out);
                    Ok(())
                }
                Effect::Emit(event) => {
                    let routed = self.route(&event, now);
                    emitted.push(event);
                    routed
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "effect failed");
            }
        }

        for event in fold_events(emitted) {
            debug!(event = event.name(), "broadcast");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    /// Delivers an emitted event to the managers listening for it.
    fn route(&mut self, event: &ClientEvent, now: Instant) -> Result<()> {
        match event {
            ClientEvent::Online { reset, .. } => {
                let reset = *reset;
                self.with_socket(now, |connection, ctx| connection.on_online(reset, ctx))?;
                self.sync.on_online(now);
            }
            ClientEvent::Offline => {
                self.with_socket(now, |connection, ctx| connection.on_offline(ctx));
            }
            ClientEvent::SocketConnected => {
                self.online.on_transport_signal(true, now, &mut self.out);
                self.sync.on_connected(now);
            }
            ClientEvent::SocketDisconnected => {
                for waiter in self.requests.clear() {
                    self.abandon(waiter);
                }
                self.sync.on_disconnected();
            }
            ClientEvent::Message(envelope) => self.on_envelope(envelope, now),
            _ => {}
        }
        Ok(())
    }

    fn on_envelope(&mut self, envelope: &ServerEnvelope, now: Instant) {
        match envelope.kind {
            EnvelopeKind::Response => match envelope.response_body() {
                Ok(body) => {
                    if let Some(completion) = self.requests.resolve(&body) {
                        self.complete(completion, now);
                    }
                }
                Err(e) => warn!(error = %e, "malformed response body"),
            },
            EnvelopeKind::Change => {
                let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = self.changes.handle(envelope, &mut *store, &mut self.out) {
                    warn!(error = %e, "failed to apply change");
                }
            }
            _ => debug!(kind = ?envelope.kind, "ignoring envelope"),
        }
    }

    fn complete(&mut self, completion: RequestCompletion, now: Instant) {
        let RequestCompletion {
            waiter,
            success,
            data,
            ..
        } = completion;
        match waiter {
            Waiter::Ping => self.connection.on_ping_result(now),
            Waiter::Replay { from } => {
                let tokens = self.with_socket(now, |connection, ctx| {
                    connection.on_replay_result(from, success, ctx)
                });
                for token in tokens {
                    if let Some(reply) = self.replay_replies.remove(&token) {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Waiter::Sync { event_id } => {
                let ctx = self.sync_context();
                self.sync.on_result(
                    event_id,
                    SyncResult::from_socket(success, data),
                    now,
                    ctx,
                    &mut self.out,
                );
            }
            Waiter::External { token } => {
                if let Some(reply) = self.request_replies.remove(&token) {
                    let _ = reply.send(Ok(SocketResponse { success, data }));
                }
            }
        }
    }

    /// Releases a waiter whose request died with the socket.
    fn abandon(&mut self, waiter: Waiter) {
        match waiter {
            Waiter::External { token } => {
                if let Some(reply) = self.request_replies.remove(&token) {
                    let _ = reply.send(Err(Error::RequestAbandoned));
                }
            }
            // Sync heads are reset by the sync manager; replays rerun on reopen.
            Waiter::Ping | Waiter::Replay { .. } | Waiter::Sync { .. } => {}
        }
    }

    fn send_request(&mut self, body: RequestBody, waiter: Waiter, now: Instant) {
        let open = self.connection.is_open();
        let sent = self
            .requests
            .send(body, waiter.clone(), open, now, &mut self.out);
        let Err(e) = sent else {
            return;
        };
        match waiter {
            Waiter::Sync { event_id } => {
                let ctx = self.sync_context();
                self.sync
                    .on_result(event_id, SyncResult::offline(), now, ctx, &mut self.out);
            }
            Waiter::External { token } => {
                if let Some(reply) = self.request_replies.remove(&token) {
                    let _ = reply.send(Err(e));
                }
            }
            Waiter::Ping | Waiter::Replay { .. } => debug!(error = %e, "socket request not sent"),
        }
    }

    async fn send_frame(&mut self, envelope: ClientEnvelope, now: Instant) {
        let Some(socket) = self.socket.as_mut() else {
            debug!("socket closed, dropping frame");
            return;
        };
        if let Err(e) = socket.send(envelope).await {
            warn!(error = %e, "socket send failed");
            self.with_socket(now, |connection, ctx| connection.on_close(ctx));
        }
    }

    fn spawn_connect(&mut self, url: String, attempt: u64) {
        if let Some(cancel) = self.connect_cancel.take() {
            cancel.cancel();
        }
        let cancel = CancellationToken::new();
        self.connect_cancel = Some(cancel.clone());
        let factory = Arc::clone(&self.socket_factory);
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let mut socket = factory();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = socket.connect(&url) => result,
            };
            let result = result.map(|()| socket);
            let _ = completions.send(Completion::Connected { attempt, result });
        });
    }

    fn drop_socket(&mut self) {
        if let Some(cancel) = self.connect_cancel.take() {
            cancel.cancel();
        }
        if let Some(socket) = self.socket.take() {
            close_in_background(socket);
        }
    }

    fn spawn_http(&self, purpose: HttpPurpose, request: HttpRequest) {
        let mut request = request;
        request.url = self.config.resolve_url(&request.url);
        if purpose != HttpPurpose::OnlineCheck {
            request = request
                .with_header("Accept", "application/vnd.layer+json; version=3.0")
                .with_header(
                    "Authorization",
                    format!("Layer session-token=\"{}\"", self.session.session_token()),
                );
            if request.body.is_some() {
                request = request.with_header("Content-Type", "application/json");
            }
        }
        debug!(method = request.method.as_str(), url = %request.url, ?purpose, "http request");

        let http = Arc::clone(&self.http);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let response = http.send(request).await;
            let _ = completions.send(Completion::Http { purpose, response });
        });
    }

    fn destroy(&mut self) {
        let now = Instant::now();
        self.with_socket(now, |connection, ctx| connection.destroy(ctx));
        self.sync.destroy();
        self.online.destroy();
        self.requests.destroy();
        self.check_replies.clear();
        self.replay_replies.clear();
        self.request_replies.clear();
    }

    fn sync_context(&self) -> SyncContext {
        SyncContext {
            online: self.online.is_online(),
            socket_open: self.connection.is_open(),
        }
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Runs `f` against the connection manager with its neighbours borrowed.
    fn with_socket<R>(
        &mut self,
        now: Instant,
        f: impl FnOnce(&mut ConnectionManager, &mut SocketContext<'_>) -> R,
    ) -> R {
        let mut ctx = SocketContext {
            now,
            online: self.online.is_online(),
            session: self.session.as_ref(),
            requests: &mut self.requests,
            out: &mut self.out,
        };
        f(&mut self.connection, &mut ctx)
    }
}

/// Next frame from the socket; pending forever while there is none.
async fn recv_frame(
    socket: &mut Option<Box<dyn SocketTransport>>,
) -> TransportResult<Option<ServerEnvelope>> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn close_in_background(mut socket: Box<dyn SocketTransport>) {
    tokio::spawn(async move {
        if let Err(e) = socket.disconnect().await {
            debug!(error = %e, "socket close failed");
        }
    });
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
