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

//! In-process WebSocket engine.
//!
//! Two [`MemoryConnection`]s are joined by a pair of bounded channels. Each
//! direction queues at most `inbound_capacity` frames; a writer facing a full
//! queue is suspended until the reader catches up. A close frame waits at most
//! `close_timeout` for room, which needs a tokio runtime with the time driver.
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use ws_session::memory;
//! use ws_session::{TransportConfig, WebSocketSession, WebSocketSessionExt};
//!
//! # futures::executor::block_on(async {
//! let (alice, bob) = memory::session_pair(&TransportConfig::default()).unwrap();
//! alice.send_message(alice.text_message("hello")).await.unwrap();
//!
//! let mut inbound = bob.receive();
//! let message = inbound.next().await.unwrap().unwrap();
//! assert_eq!(message.payload_as_text().unwrap(), "hello");
//! # });
//! ```

use crate::buffer::{DefaultBufferFactory, SharedBufferFactory};
use crate::close::CloseStatus;
use crate::config::TransportConfig;
use crate::error::SessionError;
use crate::handshake::HandshakeInfo;
use crate::message::{MessageType, WebSocketMessage};
use crate::session::{MessageStream, SessionAdapter, SessionBinding, SessionId};
use bytes::Bytes;
use futures::future::{self, BoxFuture, Either};
use futures::stream;
use futures::{FutureExt, StreamExt};
use http::Uri;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// A session running on the in-process engine.
pub type MemorySession = SessionAdapter<MemoryConnection>;

#[derive(Debug)]
enum Frame {
    Data(MessageType, Bytes),
    Close(CloseStatus),
}

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    outbound: Arc<Mutex<Option<mpsc::Sender<Frame>>>>,
    inbound: Arc<tokio::sync::Mutex<mpsc::Receiver<Frame>>>,
    /// Flips to `true` on [`MemoryConnection::disconnect`].
    dropped: Arc<watch::Sender<bool>>,
    reads: Arc<AtomicUsize>,
    capacity: usize,
    close_timeout: Duration,
}

impl MemoryConnection {
    /// Two connected ends, each direction bounded to `capacity` frames.
    pub fn pair(capacity: usize) -> (Self, Self) {
        Self::pair_with_config(&TransportConfig::default().with_inbound_capacity(capacity))
    }

    /// Two connected ends sized and timed by `config`.
    pub fn pair_with_config(config: &TransportConfig) -> (Self, Self) {
        let capacity = config.inbound_capacity.max(1);
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self::new(a_tx, a_rx, capacity, config.close_timeout),
            Self::new(b_tx, b_rx, capacity, config.close_timeout),
        )
    }

    fn new(
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
        capacity: usize,
        close_timeout: Duration,
    ) -> Self {
        let (dropped, _) = watch::channel(false);
        Self {
            outbound: Arc::new(Mutex::new(Some(tx))),
            inbound: Arc::new(tokio::sync::Mutex::new(rx)),
            dropped: Arc::new(dropped),
            reads: Arc::new(AtomicUsize::new(0)),
            capacity,
            close_timeout,
        }
    }

    /// Number of frames pulled off the wire so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Drop the connection without a close frame, as a network failure would.
    ///
    /// In-flight reads and writes on this end fail with a transport error;
    /// the peer sees its reads fail once queued frames are drained, and its
    /// writes fail right away.
    pub fn disconnect(&self) {
        debug!("memory connection dropped without close frame");
        self.dropped.send_replace(true);
        self.take_sender();
        // An active reader holds the lock and closes the queue itself.
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.close();
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Frame>> {
        lock(&self.outbound).clone()
    }

    fn take_sender(&self) -> Option<mpsc::Sender<Frame>> {
        lock(&self.outbound).take()
    }

    /// Wrap this end in a session.
    pub fn into_session(
        self,
        id: impl Into<SessionId>,
        handshake_info: HandshakeInfo,
        buffer_factory: SharedBufferFactory,
    ) -> Result<MemorySession, SessionError> {
        SessionAdapter::builder()
            .delegate(self)
            .id(id)
            .handshake_info(handshake_info)
            .buffer_factory(buffer_factory)
            .binding(Arc::new(MemoryBinding))
            .build()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn connection_dropped() -> SessionError {
    SessionError::Transport("connection dropped".to_string())
}

/// Two sessions wired to each other.
pub fn session_pair(config: &TransportConfig) -> Result<(MemorySession, MemorySession), SessionError> {
    let (a, b) = MemoryConnection::pair_with_config(config);
    let factory = DefaultBufferFactory::shared();
    let uri = Uri::from_static("ws://memory.local/");
    let a = a.into_session(
        SessionId::random(),
        HandshakeInfo::builder(uri.clone()).build(),
        factory.clone(),
    )?;
    let b = b.into_session(SessionId::random(), HandshakeInfo::builder(uri).build(), factory)?;
    Ok((a, b))
}

/// Binding for [`MemoryConnection`].
#[derive(Debug, Default)]
pub struct MemoryBinding;

impl SessionBinding<MemoryConnection> for MemoryBinding {
    fn name(&self) -> &'static str {
        "MemorySession"
    }

    fn receive(&self, connection: &MemoryConnection, buffer_factory: &SharedBufferFactory) -> MessageStream {
        let inbound = Arc::clone(&connection.inbound);
        let dropped = Arc::clone(&connection.dropped);
        let reads = Arc::clone(&connection.reads);
        let factory = Arc::clone(buffer_factory);

        stream::unfold(Some((inbound, dropped, reads, factory)), |state| async move {
            let (inbound, dropped, reads, factory) = state?;
            let mut rx = inbound.lock().await;
            let mut dropped_rx = dropped.subscribe();
            let next = {
                let recv = pin!(rx.recv());
                let gone = pin!(dropped_rx.wait_for(|dropped| *dropped));
                let raced = future::select(recv, gone).await;
                match raced {
                    Either::Left((frame, _)) => Some(frame),
                    Either::Right(_) => None,
                }
            };
            let Some(frame) = next else {
                rx.close();
                return Some((Err(connection_dropped()), None));
            };
            drop(rx);

            match frame {
                Some(Frame::Data(message_type, bytes)) => {
                    reads.fetch_add(1, Ordering::SeqCst);
                    let message = WebSocketMessage::new(message_type, factory.wrap(bytes));
                    Some((Ok(message), Some((inbound, dropped, reads, factory))))
                }
                Some(Frame::Close(status)) => {
                    reads.fetch_add(1, Ordering::SeqCst);
                    debug!("memory connection received close frame: {status}");
                    None
                }
                None => Some((
                    Err(SessionError::Transport(
                        "connection lost without close frame".to_string(),
                    )),
                    None,
                )),
            }
        })
        .boxed()
    }

    fn send(
        &self,
        connection: &MemoryConnection,
        mut messages: MessageStream,
    ) -> BoxFuture<'static, Result<(), SessionError>> {
        let outbound = connection.sender();
        let mut dropped = connection.dropped.subscribe();
        async move {
            let outbound = outbound.ok_or_else(connection_dropped)?;
            while let Some(item) = messages.next().await {
                let message = item?;
                let frame = Frame::Data(message.message_type(), message.into_payload().into_bytes());
                let sending = pin!(outbound.send(frame));
                let gone = pin!(dropped.wait_for(|dropped| *dropped));
                let raced = future::select(sending, gone).await;
                match raced {
                    Either::Left((Ok(()), _)) => {}
                    Either::Left((Err(_), _)) => {
                        return Err(SessionError::Transport("peer disconnected".to_string()))
                    }
                    Either::Right(_) => return Err(connection_dropped()),
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn close_internal(
        &self,
        connection: &MemoryConnection,
        status: CloseStatus,
    ) -> BoxFuture<'static, Result<(), SessionError>> {
        let outbound = connection.take_sender();
        let close_timeout = connection.close_timeout;
        async move {
            let Some(outbound) = outbound else {
                return Ok(());
            };
            match tokio::time::timeout(close_timeout, outbound.send(Frame::Close(status))).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(SessionError::Close("peer already disconnected".to_string())),
                Err(_) => Err(SessionError::Close(format!(
                    "close frame not queued within {close_timeout:?}"
                ))),
            }
        }
        .boxed()
    }
}
