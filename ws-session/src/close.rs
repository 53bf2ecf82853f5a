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

//! WebSocket close status codes (RFC 6455 section 7.4).

use crate::error::SessionError;
use std::borrow::Cow;
use std::fmt;

/// Close code plus an optional human readable reason.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CloseStatus {
    code: u16,
    reason: Option<Cow<'static, str>>,
}

impl CloseStatus {
    /// Normal closure; the purpose of the connection has been fulfilled.
    pub const NORMAL: CloseStatus = CloseStatus::known(1000);
    /// An endpoint is going away (server shutdown, page navigation).
    pub const GOING_AWAY: CloseStatus = CloseStatus::known(1001);
    pub const PROTOCOL_ERROR: CloseStatus = CloseStatus::known(1002);
    /// The endpoint received a data type it cannot accept.
    pub const NOT_ACCEPTABLE: CloseStatus = CloseStatus::known(1003);
    /// Reserved: no status code was present. Never sent on the wire.
    pub const NO_STATUS_CODE: CloseStatus = CloseStatus::known(1005);
    /// Reserved: the connection dropped without a close frame. Never sent on the wire.
    pub const NO_CLOSE_FRAME: CloseStatus = CloseStatus::known(1006);
    /// Data inconsistent with the message type (e.g. non UTF-8 text).
    pub const BAD_DATA: CloseStatus = CloseStatus::known(1007);
    pub const POLICY_VIOLATION: CloseStatus = CloseStatus::known(1008);
    pub const TOO_BIG_TO_PROCESS: CloseStatus = CloseStatus::known(1009);
    /// The client expected the server to negotiate an extension.
    pub const REQUIRED_EXTENSION: CloseStatus = CloseStatus::known(1010);
    pub const SERVER_ERROR: CloseStatus = CloseStatus::known(1011);
    pub const SERVICE_RESTARTED: CloseStatus = CloseStatus::known(1012);
    pub const SERVICE_OVERLOAD: CloseStatus = CloseStatus::known(1013);
    /// Reserved: TLS handshake failure. Never sent on the wire.
    pub const TLS_HANDSHAKE_FAILURE: CloseStatus = CloseStatus::known(1015);

    const fn known(code: u16) -> Self {
        Self { code, reason: None }
    }

    /// Build a status from a raw code; valid codes are `1000..=4999`.
    pub fn new(code: u16) -> Result<Self, SessionError> {
        if !(1000..5000).contains(&code) {
            return Err(SessionError::InvalidCloseStatus(code));
        }
        Ok(Self { code, reason: None })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Same code, new reason.
    pub fn with_reason(&self, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: self.code,
            reason: Some(reason.into()),
        }
    }

    /// Compare codes only, ignoring the reason.
    pub fn equals_code(&self, other: &CloseStatus) -> bool {
        self.code == other.code
    }

    /// Codes reserved for local signalling that must never appear in a close frame.
    pub fn is_reserved(&self) -> bool {
        matches!(self.code, 1005 | 1006 | 1015)
    }
}

impl Default for CloseStatus {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "CloseStatus[code={}, reason={}]", self.code, reason),
            None => write!(f, "CloseStatus[code={}]", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_out_of_range_codes() {
        assert_eq!(
            CloseStatus::new(999),
            Err(SessionError::InvalidCloseStatus(999))
        );
        assert_eq!(
            CloseStatus::new(5000),
            Err(SessionError::InvalidCloseStatus(5000))
        );
        assert_eq!(CloseStatus::new(4000).unwrap().code(), 4000);
    }

    #[test]
    fn test_with_reason_keeps_code() {
        let status = CloseStatus::GOING_AWAY.with_reason("shutting down");
        assert_eq!(status.code(), 1001);
        assert_eq!(status.reason(), Some("shutting down"));
        assert!(status.equals_code(&CloseStatus::GOING_AWAY));
        assert_ne!(status, CloseStatus::GOING_AWAY);
    }

    #[test]
    fn test_reserved_codes() {
        assert!(CloseStatus::NO_CLOSE_FRAME.is_reserved());
        assert!(!CloseStatus::NORMAL.is_reserved());
    }

    #[test]
    fn test_display() {
        assert_eq!(CloseStatus::NORMAL.to_string(), "CloseStatus[code=1000]");
        assert_eq!(
            CloseStatus::SERVER_ERROR.with_reason("boom").to_string(),
            "CloseStatus[code=1011, reason=boom]"
        );
    }
}
