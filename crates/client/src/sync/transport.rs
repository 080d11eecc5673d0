// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstractions for the socket and for REST requests.
//!
//! Both seams are traits so the engine can run against real network
//! connections in production and against in-memory fakes in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use msync_core::http::{HttpMethod, HttpRequest, HttpResponse};
use msync_core::protocol::{ClientEnvelope, ServerEnvelope};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be encoded or decoded. The connection stays usable.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// A boxed future borrowing the transport.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One socket connection to the server.
pub trait SocketTransport: Send + Sync {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, TransportResult<()>>;

    fn disconnect(&mut self) -> TransportFuture<'_, TransportResult<()>>;

    fn send(&mut self, envelope: ClientEnvelope) -> TransportFuture<'_, TransportResult<()>>;

    /// Receives the next envelope; `None` once the connection is closed.
    fn recv(&mut self) -> TransportFuture<'_, TransportResult<Option<ServerEnvelope>>>;

    fn is_connected(&self) -> bool;
}

/// Creates a fresh, unconnected socket for every connect attempt.
pub type SocketFactory = Arc<dyn Fn() -> Box<dyn SocketTransport> + Send + Sync>;

/// Executes REST requests.
///
/// Never fails: a request that could not reach the server resolves to
/// [`HttpResponse::offline`], and a timeout resolves to status 408.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_, HttpResponse>;
}

/// WebSocket transport implementation using tokio-tungstenite.
pub struct WebSocketTransport {
    ws: Option<WebSocketConnection>,
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct WebSocketConnection {
    sink: futures_util::stream::SplitSink<WsStream, tokio_tungstenite::tungstenite::Message>,
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        WebSocketTransport { ws: None }
    }

    /// A factory producing unconnected WebSocket transports.
    pub fn factory() -> SocketFactory {
        Arc::new(|| Box::new(WebSocketTransport::new()) as Box<dyn SocketTransport>)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTransport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, TransportResult<()>> {
        let url = url.to_string();
        Box::pin(async move {
            use futures_util::StreamExt;

            let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            debug!(status = response.status().as_u16(), "websocket handshake complete");

            let (sink, stream) = stream.split();
            self.ws = Some(WebSocketConnection { sink, stream });
            Ok(())
        })
    }

    /// Sends a normal close frame. A peer that already went away is not an error.
    fn disconnect(&mut self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            use futures_util::SinkExt;
            use tokio_tungstenite::tungstenite::Error as WsError;

            let Some(mut ws) = self.ws.take() else {
                return Ok(());
            };
            match ws.sink.close().await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(TransportError::SendFailed(e.to_string())),
            }
        })
    }

    fn send(&mut self, envelope: ClientEnvelope) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            use futures_util::SinkExt;
            use tokio_tungstenite::tungstenite::Message;

            let json = envelope
                .to_json()
                .map_err(|e| TransportError::SerializationError(e.to_string()))?;
            let ws = self.ws.as_mut().ok_or(TransportError::ConnectionClosed)?;

            // `SinkExt::send` flushes, so a dead peer surfaces here.
            let sent = ws.sink.send(Message::Text(json.into())).await;
            sent.map_err(|e| {
                self.ws = None;
                TransportError::SendFailed(e.to_string())
            })
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, TransportResult<Option<ServerEnvelope>>> {
        Box::pin(async move {
            use futures_util::StreamExt;
            use tokio_tungstenite::tungstenite::Message;

            let ws = self.ws.as_mut().ok_or(TransportError::ConnectionClosed)?;
            loop {
                let frame = match ws.stream.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        self.ws = None;
                        return Err(TransportError::ReceiveFailed(e.to_string()));
                    }
                    None => {
                        self.ws = None;
                        return Ok(None);
                    }
                };
                match frame {
                    Message::Text(text) => return decode_envelope(text.as_bytes()),
                    Message::Binary(bytes) => return decode_envelope(&bytes),
                    Message::Close(close) => {
                        if let Some(close) = close {
                            debug!(
                                code = u16::from(close.code),
                                reason = close.reason.as_str(),
                                "server closed socket"
                            );
                        }
                        self.ws = None;
                        return Ok(None);
                    }
                    // Pings are answered by tungstenite on the next write.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.ws.is_some()
    }
}

/// Decodes one server frame. Malformed JSON leaves the connection usable.
fn decode_envelope(bytes: &[u8]) -> TransportResult<Option<ServerEnvelope>> {
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// REST transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_, HttpResponse> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(reqwest_method(request.method), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    // Empty or non-JSON bodies read as null.
                    let body = response.json::<Value>().await.unwrap_or(Value::Null);
                    HttpResponse::new(status, body)
                }
                Err(e) if e.is_timeout() => {
                    debug!(url = %request.url, "request timed out");
                    HttpResponse::new(408, Value::Null)
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "request did not reach the server");
                    HttpResponse::offline()
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
