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

//! Runtime-neutral WebSocket sessions.
//!
//! Application code talks to [`WebSocketSession`]; each WebSocket engine
//! plugs in through a [`SessionBinding`] wrapped by a [`SessionAdapter`],
//! which owns identity, handshake metadata, message construction and the
//! close lifecycle.
//!
//! # Features
//!
//! - **`native`** (default): `tokio-tungstenite` binding and the
//!   `ws_echo_server` binary

pub mod buffer;
pub mod close;
pub mod config;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod memory;
pub mod message;
pub mod session;

// ── Native bindings ───────────────────────────────────────────────────────────

#[cfg(feature = "native")]
pub mod native_websocket;

pub use buffer::{DataBuffer, DataBufferFactory, DefaultBufferFactory, SharedBufferFactory};
pub use close::CloseStatus;
pub use config::TransportConfig;
pub use error::SessionError;
pub use handler::{EchoHandler, WebSocketHandler};
pub use handshake::HandshakeInfo;
pub use message::{MessageType, WebSocketMessage};
pub use session::{
    MessageStream, SessionAdapter, SessionBinding, SessionId, SessionState, WebSocketSession,
    WebSocketSessionExt,
};
