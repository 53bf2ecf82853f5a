/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Native WebSocket binding using `tokio-tungstenite`.
//!
//! [`NativeWebSocket`] opens client connections and accepts server
//! connections; either way the result is a [`SessionAdapter`] over a
//! [`NativeConnection`]. Reads are pulled from the socket only when the
//! inbound stream is polled, so a slow consumer stalls the TCP window rather
//! than growing a queue.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use ws_session::native_websocket::NativeWebSocket;
//! use ws_session::{CloseStatus, TransportConfig, WebSocketSession, WebSocketSessionExt};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let websocket = NativeWebSocket::new(TransportConfig::from_env());
//! let session = websocket.connect("ws://localhost:8080/echo").await?;
//!
//! session.send_message(session.text_message("hello")).await?;
//! if let Some(reply) = session.receive().next().await {
//!     println!("Received {}", reply?.payload_as_text()?);
//! }
//! session.close(CloseStatus::NORMAL).await?;
//! # Ok(())
//! # }
//! ```

use crate::buffer::{DefaultBufferFactory, SharedBufferFactory};
use crate::close::CloseStatus;
use crate::config::TransportConfig;
use crate::error::SessionError;
use crate::handshake::HandshakeInfo;
use crate::message::{MessageType, WebSocketMessage};
use crate::session::{MessageStream, SessionAdapter, SessionBinding, SessionId};
use futures::future::BoxFuture;
use futures::stream::{self, SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::{HeaderMap, HeaderValue, Uri};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Session produced by [`NativeWebSocket::connect`].
pub type ClientSession = SessionAdapter<NativeConnection<MaybeTlsStream<TcpStream>>>;

/// Session produced by [`NativeWebSocket::accept`].
pub type ServerSession = SessionAdapter<NativeConnection<TcpStream>>;

/// Error type for opening a WebSocket connection.
///
/// Preserves the HTTP status code when the server rejects the WebSocket
/// upgrade (401, 403, 410, etc.).
#[derive(Debug, thiserror::Error)]
pub enum WebSocketConnectError {
    /// The server rejected the upgrade with an HTTP error status.
    #[error("HTTP {status}: WebSocket upgrade rejected")]
    HttpError {
        /// The HTTP status code returned by the server.
        status: u16,
    },
    /// A transport-level or protocol-level error occurred.
    #[error("WebSocket connection failed: {0}")]
    Other(String),
}

impl WebSocketConnectError {
    /// Returns the HTTP status code if this was an HTTP rejection, else `None`.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status } => Some(*status),
            Self::Other(_) => None,
        }
    }
}

impl From<SessionError> for WebSocketConnectError {
    fn from(err: SessionError) -> Self {
        Self::Other(err.to_string())
    }
}

/// Entry point for `tokio-tungstenite` sessions.
#[derive(Clone, Debug)]
pub struct NativeWebSocket {
    config: TransportConfig,
    buffer_factory: SharedBufferFactory,
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new(TransportConfig::global().clone())
    }
}

impl NativeWebSocket {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            buffer_factory: DefaultBufferFactory::shared(),
        }
    }

    pub fn with_buffer_factory(mut self, buffer_factory: SharedBufferFactory) -> Self {
        self.buffer_factory = buffer_factory;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect to a WebSocket server.
    ///
    /// Offers the configured sub-protocols, if any.
    ///
    /// # Arguments
    /// * `url` - Full WebSocket URL, e.g. `"ws://host:port/path"`
    pub async fn connect(&self, url: &str) -> Result<ClientSession, WebSocketConnectError> {
        let parsed = Url::parse(url)
            .map_err(|e| WebSocketConnectError::Other(format!("Invalid WebSocket URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(WebSocketConnectError::Other(format!(
                "Unsupported scheme '{}' in '{url}'",
                parsed.scheme()
            )));
        }

        info!("NativeWebSocket connecting to {url}");
        let mut request = url
            .into_client_request()
            .map_err(|e| WebSocketConnectError::Other(e.to_string()))?;
        if !self.config.subprotocols.is_empty() {
            let offered = HeaderValue::from_str(&self.config.subprotocols.join(", "))
                .map_err(|e| WebSocketConnectError::Other(format!("Invalid sub-protocol list: {e}")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }
        let uri = request.uri().clone();

        let (ws_stream, response) = tokio_tungstenite::connect_async_with_config(
            request,
            Some(websocket_config(&self.config)),
            false,
        )
        .await
        .map_err(|e| match e {
            WsError::Http(resp) => WebSocketConnectError::HttpError {
                status: resp.status().as_u16(),
            },
            other => WebSocketConnectError::Other(other.to_string()),
        })?;
        info!("WebSocket connected to {url} (HTTP {})", response.status());

        let (local_address, remote_address) = match ws_stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp_addresses(tcp),
            _ => (None, None),
        };
        let handshake_info = HandshakeInfo::builder(uri)
            .subprotocol(subprotocol_of(response.headers()))
            .headers(response.headers().clone())
            .local_address(local_address)
            .remote_address(remote_address)
            .build();

        Ok(self.wrap(ws_stream, handshake_info)?)
    }

    /// Run the server side of the upgrade on an accepted TCP stream.
    ///
    /// The sub-protocol is picked from the client's offer in configured
    /// preference order.
    pub async fn accept(&self, stream: TcpStream) -> Result<ServerSession, WebSocketConnectError> {
        let (local_address, remote_address) = tcp_addresses(&stream);

        let mut upgrade: Option<(Uri, HeaderMap, Option<String>)> = None;
        let config = &self.config;
        let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            let chosen = request
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|offered| offered.to_str().ok())
                .and_then(|offered| config.negotiate_subprotocol(offered));
            if let Some(value) = chosen.as_deref().and_then(|p| HeaderValue::from_str(p).ok()) {
                response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
            upgrade = Some((request.uri().clone(), request.headers().clone(), chosen));
            Ok(response)
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(websocket_config(&self.config)),
        )
        .await
        .map_err(|e| WebSocketConnectError::Other(format!("handshake with {remote_address:?} failed: {e}")))?;

        let (uri, headers, subprotocol) = upgrade
            .ok_or_else(|| WebSocketConnectError::Other("upgrade completed without a request".to_string()))?;
        info!("WebSocket accepted {uri} from {remote_address:?}");

        let handshake_info = HandshakeInfo::builder(uri)
            .headers(headers)
            .subprotocol(subprotocol)
            .local_address(local_address)
            .remote_address(remote_address)
            .build();

        Ok(self.wrap(ws_stream, handshake_info)?)
    }

    /// Wrap an already upgraded stream.
    pub fn wrap<S>(
        &self,
        ws_stream: WebSocketStream<S>,
        handshake_info: HandshakeInfo,
    ) -> Result<SessionAdapter<NativeConnection<S>>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        SessionAdapter::builder()
            .delegate(NativeConnection::new(ws_stream, self.config.close_timeout))
            .id(SessionId::random())
            .handshake_info(handshake_info)
            .buffer_factory(Arc::clone(&self.buffer_factory))
            .binding(Arc::new(NativeBinding))
            .build()
    }
}

fn websocket_config(config: &TransportConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config
}

fn subprotocol_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Split halves of a `tokio-tungstenite` stream.
pub struct NativeConnection<S> {
    reader: Arc<Mutex<SplitStream<WebSocketStream<S>>>>,
    writer: Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>,
    close_timeout: Duration,
}

impl<S> NativeConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(ws_stream: WebSocketStream<S>, close_timeout: Duration) -> Self {
        let (writer, reader) = ws_stream.split();
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            close_timeout,
        }
    }
}

impl<S> std::fmt::Debug for NativeConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeConnection")
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

/// Binding for [`NativeConnection`].
#[derive(Debug, Default)]
pub struct NativeBinding;

impl<S> SessionBinding<NativeConnection<S>> for NativeBinding
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        "NativeWebSocketSession"
    }

    fn receive(&self, connection: &NativeConnection<S>, buffer_factory: &SharedBufferFactory) -> MessageStream {
        let reader = Arc::clone(&connection.reader);
        let writer = Arc::clone(&connection.writer);
        let factory = Arc::clone(buffer_factory);

        stream::unfold(Some((reader, writer, factory)), |state| async move {
            let (reader, writer, factory) = state?;
            loop {
                let next = reader.lock().await.next().await;
                let message = match next {
                    Some(Ok(Message::Text(text))) => {
                        WebSocketMessage::new(MessageType::Text, factory.wrap_vec(text.into_bytes()))
                    }
                    Some(Ok(Message::Binary(data))) => {
                        WebSocketMessage::new(MessageType::Binary, factory.wrap_vec(data))
                    }
                    Some(Ok(Message::Ping(data))) => {
                        WebSocketMessage::new(MessageType::Ping, factory.wrap_vec(data))
                    }
                    Some(Ok(Message::Pong(data))) => {
                        WebSocketMessage::new(MessageType::Pong, factory.wrap_vec(data))
                    }
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket received close frame: {frame:?}");
                        // Flush the close reply queued by tungstenite.
                        if let Err(e) = writer.lock().await.flush().await {
                            debug!("close reply not sent: {e}");
                        }
                        return None;
                    }
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        debug!("WebSocket stream ended");
                        return None;
                    }
                    Some(Err(e)) => return Some((Err(SessionError::transport(e)), None)),
                };
                return Some((Ok(message), Some((reader, writer, factory))));
            }
        })
        .boxed()
    }

    fn send(
        &self,
        connection: &NativeConnection<S>,
        mut messages: MessageStream,
    ) -> BoxFuture<'static, Result<(), SessionError>> {
        let writer = Arc::clone(&connection.writer);
        async move {
            while let Some(item) = messages.next().await {
                let message = to_native(item?)?;
                writer
                    .lock()
                    .await
                    .send(message)
                    .await
                    .map_err(SessionError::transport)?;
            }
            Ok(())
        }
        .boxed()
    }

    fn close_internal(
        &self,
        connection: &NativeConnection<S>,
        status: CloseStatus,
    ) -> BoxFuture<'static, Result<(), SessionError>> {
        let writer = Arc::clone(&connection.writer);
        let close_timeout = connection.close_timeout;
        async move {
            // Reserved codes must never appear on the wire.
            let frame = (!status.is_reserved()).then(|| CloseFrame {
                code: CloseCode::from(status.code()),
                reason: Cow::Owned(status.reason().unwrap_or_default().to_string()),
            });
            let sending = async { writer.lock().await.send(Message::Close(frame)).await };

            match tokio::time::timeout(close_timeout, sending).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("connection already closed");
                    Ok(())
                }
                Ok(Err(e)) => {
                    warn!("Failed to send close frame: {e}");
                    Err(SessionError::Close(e.to_string()))
                }
                Err(_) => Err(SessionError::Close(format!(
                    "close frame not flushed within {close_timeout:?}"
                ))),
            }
        }
        .boxed()
    }
}

fn to_native(message: WebSocketMessage) -> Result<Message, SessionError> {
    let message_type = message.message_type();
    let payload = message.into_payload();
    Ok(match message_type {
        MessageType::Text => Message::Text(payload.to_utf8()?),
        MessageType::Binary => Message::Binary(payload.to_vec()),
        MessageType::Ping => Message::Ping(payload.to_vec()),
        MessageType::Pong => Message::Pong(payload.to_vec()),
    })
}

fn tcp_addresses(stream: &TcpStream) -> (Option<SocketAddr>, Option<SocketAddr>) {
    (stream.local_addr().ok(), stream.peer_addr().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBuffer;

    #[test]
    fn test_connect_error_http_status() {
        let err = WebSocketConnectError::HttpError { status: 401 };
        assert_eq!(err.http_status(), Some(401));
        assert_eq!(err.to_string(), "HTTP 401: WebSocket upgrade rejected");

        let err = WebSocketConnectError::Other("connection refused".to_string());
        assert_eq!(err.http_status(), None);
    }

    #[test]
    fn test_to_native_maps_every_type() {
        let text = WebSocketMessage::new(MessageType::Text, DataBuffer::from(b"hi".to_vec()));
        assert_eq!(to_native(text).unwrap(), Message::Text("hi".to_string()));

        let ping = WebSocketMessage::new(MessageType::Ping, DataBuffer::from(vec![1, 2]));
        assert_eq!(to_native(ping).unwrap(), Message::Ping(vec![1, 2]));

        let pong = WebSocketMessage::new(MessageType::Pong, DataBuffer::default());
        assert_eq!(to_native(pong).unwrap(), Message::Pong(Vec::new()));
    }

    #[test]
    fn test_to_native_rejects_invalid_text() {
        let text = WebSocketMessage::new(MessageType::Text, DataBuffer::from(vec![0xff, 0xfe]));
        assert!(matches!(to_native(text), Err(SessionError::InvalidPayload(_))));
    }

    #[test]
    fn test_subprotocol_of_trims_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(subprotocol_of(&headers), None);
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(" chat.v1"));
        assert_eq!(subprotocol_of(&headers), Some("chat.v1".to_string()));
    }

    #[test]
    fn test_websocket_config_applies_message_limit() {
        let config = TransportConfig {
            max_message_size: 1024,
            ..TransportConfig::default()
        };
        assert_eq!(websocket_config(&config).max_message_size, Some(1024));
    }
}
