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

//! Session adapter wrapping a native connection.
//!
//! The adapter owns identity, validation and lifecycle; the runtime binding
//! only moves bytes and performs the native close.

use super::coordinator::{ActiveGuard, CloseCoordinator, SessionState, StateHandle};
use super::{MessageStream, SessionId, WebSocketSession};
use crate::buffer::SharedBufferFactory;
use crate::close::CloseStatus;
use crate::error::SessionError;
use crate::handshake::HandshakeInfo;
use crate::message::WebSocketMessage;
use futures::future::{self, BoxFuture, Either};
use futures::stream::{self, Stream};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, debug_span, warn, Instrument};

/// Runtime-specific half of a session.
///
/// `close_internal` is the only required method. Bindings that can stream
/// override `receive` and `send`; the defaults fail with
/// [`SessionError::Unsupported`].
pub trait SessionBinding<T>: Send + Sync + 'static {
    /// Name used in the session's `Display` output.
    fn name(&self) -> &'static str {
        "SessionAdapter"
    }

    /// Wire native read events into a message stream.
    ///
    /// Must not read ahead of demand, or must bound what it buffers.
    fn receive(&self, _delegate: &T, _buffer_factory: &SharedBufferFactory) -> MessageStream {
        let err = SessionError::Unsupported {
            binding: self.name(),
            operation: "receive",
        };
        stream::once(future::ready(Err(err))).boxed()
    }

    /// Write `messages` in order, pulling the next one only after the native
    /// transport accepted the previous one.
    fn send(
        &self,
        _delegate: &T,
        _messages: MessageStream,
    ) -> BoxFuture<'static, Result<(), SessionError>> {
        let err = SessionError::Unsupported {
            binding: self.name(),
            operation: "send",
        };
        future::ready(Err(err)).boxed()
    }

    /// Tear down the native connection.
    fn close_internal(
        &self,
        delegate: &T,
        status: CloseStatus,
    ) -> BoxFuture<'static, Result<(), SessionError>>;
}

/// A [`WebSocketSession`] over native delegate `T`.
///
/// Delegate, id, handshake info and buffer factory are fixed at
/// construction; only the lifecycle state changes afterwards.
pub struct SessionAdapter<T> {
    delegate: T,
    id: SessionId,
    handshake_info: HandshakeInfo,
    buffer_factory: SharedBufferFactory,
    binding: Arc<dyn SessionBinding<T>>,
    coordinator: CloseCoordinator,
}

impl<T: Send + Sync + 'static> SessionAdapter<T> {
    pub fn builder() -> SessionAdapterBuilder<T> {
        SessionAdapterBuilder::default()
    }

    /// The native connection. Meant for the binding that owns this adapter.
    pub fn delegate(&self) -> &T {
        &self.delegate
    }

    fn span(&self, op: &'static str) -> tracing::Span {
        debug_span!("ws_session", op, session_id = %self.id, uri = %self.handshake_info.uri())
    }
}

impl<T: Send + Sync + 'static> WebSocketSession for SessionAdapter<T> {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn handshake_info(&self) -> &HandshakeInfo {
        &self.handshake_info
    }

    fn buffer_factory(&self) -> &SharedBufferFactory {
        &self.buffer_factory
    }

    fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    fn receive(&self) -> MessageStream {
        if !self.is_open() {
            return stream::once(future::ready(Err(SessionError::Closed))).boxed();
        }
        let Some(guard) = self.coordinator.acquire_receiver() else {
            return stream::once(future::ready(Err(SessionError::ReceiveInProgress))).boxed();
        };

        let span = self.span("receive");
        let inner = span.in_scope(|| self.binding.receive(&self.delegate, &self.buffer_factory));
        let state = self.coordinator.handle();
        InboundStream {
            inner: Some(inner),
            closed: state.reached(SessionState::Closed),
            state,
            span,
            _guard: guard,
        }
        .boxed()
    }

    fn send(&self, messages: MessageStream) -> BoxFuture<'static, Result<(), SessionError>> {
        if !self.is_open() {
            return future::ready(Err(SessionError::Closed)).boxed();
        }
        let Some(guard) = self.coordinator.acquire_sender() else {
            return future::ready(Err(SessionError::SendInProgress)).boxed();
        };

        let span = self.span("send");
        let writing = span.in_scope(|| self.binding.send(&self.delegate, messages));
        let state = self.coordinator.handle();
        let closing = state.reached(SessionState::Closing);
        async move {
            let _guard: ActiveGuard = guard;
            let outcome = match future::select(writing, closing).await {
                Either::Left((outcome, _)) => outcome,
                Either::Right(((), _)) => {
                    debug!("send stopped by close");
                    Err(SessionError::Closed)
                }
            };
            if let Err(e) = &outcome {
                if e.is_transport() {
                    warn!("send failed: {e}");
                    state.mark_closed();
                }
            }
            outcome
        }
        .instrument(span)
        .boxed()
    }

    fn close(&self, status: CloseStatus) -> BoxFuture<'static, Result<(), SessionError>> {
        let span = self.span("close");
        let closing = span.in_scope(|| {
            debug!(code = status.code(), reason = status.reason(), "Closing {}", self);
            self.coordinator
                .close_with(|| self.binding.close_internal(&self.delegate, status))
        });
        closing.instrument(span).boxed()
    }
}

impl<T: Send + Sync + 'static> fmt::Display for SessionAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[id={}, uri={}]",
            self.binding.name(),
            self.id,
            self.handshake_info.uri()
        )
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for SessionAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAdapter")
            .field("binding", &self.binding.name())
            .field("id", &self.id)
            .field("uri", self.handshake_info.uri())
            .field("state", &self.coordinator.state())
            .finish()
    }
}

/// Inbound stream handed to callers.
///
/// Ends when the binding's stream ends, after the first error, or once the
/// session is closed. Dropping it releases the single-consumer slot.
struct InboundStream {
    inner: Option<MessageStream>,
    closed: BoxFuture<'static, ()>,
    state: StateHandle,
    span: tracing::Span,
    _guard: ActiveGuard,
}

impl Stream for InboundStream {
    type Item = Result<WebSocketMessage, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        let _entered = this.span.enter();

        if this.closed.poll_unpin(cx).is_ready() {
            this.inner = None;
            debug!("inbound stream ended by close");
            return Poll::Ready(None);
        }

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                if e.is_transport() {
                    warn!("receive failed: {e}");
                    this.state.mark_closed();
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                debug!("inbound stream completed");
                this.state.mark_closed();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Builder for [`SessionAdapter`]. Every field is required.
pub struct SessionAdapterBuilder<T> {
    delegate: Option<T>,
    id: Option<SessionId>,
    handshake_info: Option<HandshakeInfo>,
    buffer_factory: Option<SharedBufferFactory>,
    binding: Option<Arc<dyn SessionBinding<T>>>,
}

impl<T> Default for SessionAdapterBuilder<T> {
    fn default() -> Self {
        Self {
            delegate: None,
            id: None,
            handshake_info: None,
            buffer_factory: None,
            binding: None,
        }
    }
}

impl<T: Send + Sync + 'static> SessionAdapterBuilder<T> {
    pub fn delegate(mut self, delegate: T) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn id(mut self, id: impl Into<SessionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn handshake_info(mut self, handshake_info: HandshakeInfo) -> Self {
        self.handshake_info = Some(handshake_info);
        self
    }

    pub fn buffer_factory(mut self, buffer_factory: SharedBufferFactory) -> Self {
        self.buffer_factory = Some(buffer_factory);
        self
    }

    pub fn binding(mut self, binding: Arc<dyn SessionBinding<T>>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Validate and assemble the adapter. Nothing is constructed on failure.
    pub fn build(self) -> Result<SessionAdapter<T>, SessionError> {
        let delegate = self
            .delegate
            .ok_or(SessionError::InvalidArgument("native session is required"))?;
        let id = self
            .id
            .ok_or(SessionError::InvalidArgument("session id is required"))?;
        if id.as_str().is_empty() {
            return Err(SessionError::InvalidArgument("session id must not be empty"));
        }
        let handshake_info = self
            .handshake_info
            .ok_or(SessionError::InvalidArgument("handshake info is required"))?;
        let buffer_factory = self
            .buffer_factory
            .ok_or(SessionError::InvalidArgument("buffer factory is required"))?;
        let binding = self
            .binding
            .ok_or(SessionError::InvalidArgument("session binding is required"))?;

        Ok(SessionAdapter {
            delegate,
            id,
            handshake_info,
            buffer_factory,
            binding,
            coordinator: CloseCoordinator::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DataBuffer, DefaultBufferFactory};
    use crate::message::MessageType;
    use crate::session::WebSocketSessionExt;
    use http::Uri;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Binding that only knows how to close.
    #[derive(Default)]
    struct CloseOnly {
        closes: AtomicUsize,
    }

    impl SessionBinding<&'static str> for CloseOnly {
        fn name(&self) -> &'static str {
            "CloseOnlySession"
        }

        fn close_internal(
            &self,
            _delegate: &&'static str,
            _status: CloseStatus,
        ) -> BoxFuture<'static, Result<(), SessionError>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok(())).boxed()
        }
    }

    fn handshake() -> HandshakeInfo {
        HandshakeInfo::builder(Uri::from_static("ws://localhost/echo")).build()
    }

    fn adapter(binding: Arc<CloseOnly>) -> SessionAdapter<&'static str> {
        SessionAdapter::builder()
            .delegate("native")
            .id("session-1")
            .handshake_info(handshake())
            .buffer_factory(DefaultBufferFactory::shared())
            .binding(binding)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_every_collaborator() {
        let full = || {
            SessionAdapter::<&'static str>::builder()
                .delegate("native")
                .id("session-1")
                .handshake_info(handshake())
                .buffer_factory(DefaultBufferFactory::shared())
                .binding(Arc::new(CloseOnly::default()))
        };
        assert!(full().build().is_ok());

        let mut missing = full();
        missing.delegate = None;
        assert_eq!(
            missing.build().unwrap_err(),
            SessionError::InvalidArgument("native session is required")
        );

        let mut missing = full();
        missing.id = None;
        assert!(matches!(missing.build(), Err(SessionError::InvalidArgument(_))));

        let mut missing = full();
        missing.handshake_info = None;
        assert!(matches!(missing.build(), Err(SessionError::InvalidArgument(_))));

        let mut missing = full();
        missing.buffer_factory = None;
        assert!(matches!(missing.build(), Err(SessionError::InvalidArgument(_))));

        let mut missing = full();
        missing.binding = None;
        assert!(matches!(missing.build(), Err(SessionError::InvalidArgument(_))));

        assert_eq!(
            full().id("").build().unwrap_err(),
            SessionError::InvalidArgument("session id must not be empty")
        );
    }

    #[test]
    fn test_display_names_binding_id_and_uri() {
        let session = adapter(Arc::new(CloseOnly::default()));
        assert_eq!(
            session.to_string(),
            "CloseOnlySession[id=session-1, uri=ws://localhost/echo]"
        );
    }

    #[tokio::test]
    async fn test_default_streaming_is_unsupported() {
        let session = adapter(Arc::new(CloseOnly::default()));

        let mut inbound = session.receive();
        assert!(matches!(
            inbound.next().await,
            Some(Err(SessionError::Unsupported { operation: "receive", .. }))
        ));
        assert!(inbound.next().await.is_none());
        drop(inbound);

        let message = session.binary_message(|f| f.wrap_vec(vec![1]));
        assert!(matches!(
            session.send_message(message).await,
            Err(SessionError::Unsupported { operation: "send", .. })
        ));
        // Unsupported is not a transport failure.
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let binding = Arc::new(CloseOnly::default());
        let session = adapter(binding.clone());

        session.close(CloseStatus::NORMAL).await.unwrap();
        session.close(CloseStatus::GOING_AWAY).await.unwrap();

        assert_eq!(binding.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.delegate(), &"native");
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let session = adapter(Arc::new(CloseOnly::default()));
        session.close(CloseStatus::NORMAL).await.unwrap();

        let mut inbound = session.receive();
        assert_eq!(inbound.next().await, Some(Err(SessionError::Closed)));

        let text = session.text_message("late");
        assert_eq!(session.send_message(text).await, Err(SessionError::Closed));
    }

    #[test]
    fn test_builders_tag_and_wrap() {
        let session = adapter(Arc::new(CloseOnly::default()));
        let text = session.text_message("hi");
        assert_eq!(text.message_type(), MessageType::Text);
        assert_eq!(text.payload().as_bytes(), b"hi");

        let pong = session.pong_message(|_| DataBuffer::from(vec![9]));
        assert_eq!(pong.message_type(), MessageType::Pong);
    }
}
