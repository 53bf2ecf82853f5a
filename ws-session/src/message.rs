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

use crate::buffer::DataBuffer;
use crate::error::SessionError;
use std::fmt;

/// Kind of WebSocket message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Binary,
    Ping,
    Pong,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::Binary => write!(f, "binary"),
            MessageType::Ping => write!(f, "ping"),
            MessageType::Pong => write!(f, "pong"),
        }
    }
}

/// A single WebSocket message: a type tag and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebSocketMessage {
    message_type: MessageType,
    payload: DataBuffer,
}

impl WebSocketMessage {
    pub fn new(message_type: MessageType, payload: DataBuffer) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &DataBuffer {
        &self.payload
    }

    pub fn into_payload(self) -> DataBuffer {
        self.payload
    }

    /// Decode the payload as UTF-8 regardless of the message type.
    pub fn payload_as_text(&self) -> Result<String, SessionError> {
        self.payload.to_utf8()
    }

    pub fn is_control(&self) -> bool {
        matches!(self.message_type, MessageType::Ping | MessageType::Pong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames() {
        let ping = WebSocketMessage::new(MessageType::Ping, DataBuffer::default());
        let text = WebSocketMessage::new(MessageType::Text, DataBuffer::from(b"hi".to_vec()));
        assert!(ping.is_control());
        assert!(!text.is_control());
        assert_eq!(text.payload_as_text().unwrap(), "hi");
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::Binary.to_string(), "binary");
        assert_eq!(MessageType::Pong.to_string(), "pong");
    }
}
