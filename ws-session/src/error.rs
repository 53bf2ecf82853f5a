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

//! Error type shared by every session operation.

/// Errors surfaced by session construction, streaming and close.
///
/// Variants carry rendered messages rather than boxed sources so that a single
/// close outcome can be cloned and handed to every caller awaiting it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A required collaborator was missing or malformed at construction time.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A close code outside of `1000..=4999`.
    #[error("invalid close status code: {0}")]
    InvalidCloseStatus(u16),

    /// A payload the native engine cannot carry (e.g. non UTF-8 text).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Native read or write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's outbound stream signalled an error.
    #[error("outbound stream failed: {0}")]
    Upstream(String),

    /// Failure inside the runtime-specific close.
    #[error("close failed: {0}")]
    Close(String),

    /// The session is closing or closed.
    #[error("session is closed")]
    Closed,

    /// Another consumer is already reading from this session.
    #[error("a receive stream is already active on this session")]
    ReceiveInProgress,

    /// Another producer is already writing to this session.
    #[error("a send is already in progress on this session")]
    SendInProgress,

    /// The runtime binding does not implement the operation.
    #[error("operation not supported by {binding}: {operation}")]
    Unsupported {
        binding: &'static str,
        operation: &'static str,
    },
}

impl SessionError {
    /// Wrap any displayable native error as a transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether this error was produced by the native transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_helper_renders_source() {
        let err = SessionError::transport("connection reset by peer");
        assert!(err.is_transport());
        assert!(format!("{err}").contains("connection reset by peer"));
    }

    #[test]
    fn test_unsupported_names_binding_and_operation() {
        let err = SessionError::Unsupported {
            binding: "CloseOnly",
            operation: "receive",
        };
        let rendered = format!("{err}");
        assert!(rendered.contains("CloseOnly"));
        assert!(rendered.contains("receive"));
        assert!(!err.is_transport());
    }
}
