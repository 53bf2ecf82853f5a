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

//! The runtime-neutral session contract.
//!
//! Handlers only ever see [`WebSocketSession`] (usually as
//! `Arc<dyn WebSocketSession>`). Runtime bindings build a [`SessionAdapter`]
//! around their native connection and plug their I/O in through
//! [`SessionBinding`].

mod adapter;
mod coordinator;

pub use adapter::{SessionAdapter, SessionAdapterBuilder, SessionBinding};
pub use coordinator::SessionState;

use crate::buffer::{DataBuffer, SharedBufferFactory};
use crate::close::CloseStatus;
use crate::error::SessionError;
use crate::handshake::HandshakeInfo;
use crate::message::{MessageType, WebSocketMessage};
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;

/// Stream of messages flowing in either direction.
///
/// Inbound, an `Err` item is the transport failure that ended the stream.
/// Outbound, an `Err` item aborts the send.
pub type MessageStream = BoxStream<'static, Result<WebSocketMessage, SessionError>>;

/// Unique, immutable session identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    /// Fresh UUIDv4 based identifier.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// A WebSocket session, independent of the engine underneath.
///
/// Every method takes `&self` and returns `'static` futures and streams, so
/// one session can be read, written and closed from different tasks at the
/// same time.
pub trait WebSocketSession: Send + Sync + fmt::Display {
    fn id(&self) -> &SessionId;

    fn handshake_info(&self) -> &HandshakeInfo;

    /// Factory used for every payload this session creates.
    fn buffer_factory(&self) -> &SharedBufferFactory;

    fn state(&self) -> SessionState;

    fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Inbound messages in arrival order.
    ///
    /// The stream ends when the connection closes and yields a single `Err`
    /// if the transport fails. Only one stream may be active at a time;
    /// dropping it stops reading without closing the session.
    fn receive(&self) -> MessageStream;

    /// Write every message of `messages`, in order.
    ///
    /// The next message is pulled only once the transport accepted the
    /// previous one. Resolves after the last message is flushed.
    fn send(&self, messages: MessageStream) -> BoxFuture<'static, Result<(), SessionError>>;

    /// Close the session. Repeated calls share the outcome of the first one.
    fn close(&self, status: CloseStatus) -> BoxFuture<'static, Result<(), SessionError>>;
}

/// Message builders and send shortcuts available on every session,
/// including `dyn WebSocketSession`.
pub trait WebSocketSessionExt: WebSocketSession {
    /// Text message carrying the UTF-8 encoding of `payload`.
    fn text_message(&self, payload: &str) -> WebSocketMessage {
        let buffer = self.buffer_factory().wrap_vec(payload.as_bytes().to_vec());
        WebSocketMessage::new(MessageType::Text, buffer)
    }

    fn binary_message<F>(&self, payload_factory: F) -> WebSocketMessage
    where
        F: FnOnce(&SharedBufferFactory) -> DataBuffer,
    {
        WebSocketMessage::new(MessageType::Binary, payload_factory(self.buffer_factory()))
    }

    fn ping_message<F>(&self, payload_factory: F) -> WebSocketMessage
    where
        F: FnOnce(&SharedBufferFactory) -> DataBuffer,
    {
        WebSocketMessage::new(MessageType::Ping, payload_factory(self.buffer_factory()))
    }

    fn pong_message<F>(&self, payload_factory: F) -> WebSocketMessage
    where
        F: FnOnce(&SharedBufferFactory) -> DataBuffer,
    {
        WebSocketMessage::new(MessageType::Pong, payload_factory(self.buffer_factory()))
    }

    /// Send an infallible stream of messages.
    fn send_messages<S>(&self, messages: S) -> BoxFuture<'static, Result<(), SessionError>>
    where
        S: Stream<Item = WebSocketMessage> + Send + 'static,
    {
        self.send(messages.map(Ok).boxed())
    }

    fn send_message(&self, message: WebSocketMessage) -> BoxFuture<'static, Result<(), SessionError>> {
        self.send(stream::once(future::ready(Ok(message))).boxed())
    }
}

impl<S: WebSocketSession + ?Sized> WebSocketSessionExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_unique() {
        let a = SessionId::random();
        let b = SessionId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_id_display_and_debug() {
        let id = SessionId::from("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(format!("{id:?}"), "SessionId(abc)");
    }
}
