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

//! Snapshot of what was negotiated when the connection was established.

use http::{HeaderMap, Uri};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Immutable handshake metadata captured by the runtime binding.
///
/// Built once through [`HandshakeInfo::builder`] and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct HandshakeInfo {
    uri: Uri,
    headers: HeaderMap,
    subprotocol: Option<String>,
    principal: Option<String>,
    local_address: Option<SocketAddr>,
    remote_address: Option<SocketAddr>,
    attributes: BTreeMap<String, String>,
}

impl HandshakeInfo {
    pub fn builder(uri: Uri) -> HandshakeInfoBuilder {
        HandshakeInfoBuilder {
            info: HandshakeInfo {
                uri,
                headers: HeaderMap::new(),
                subprotocol: None,
                principal: None,
                local_address: None,
                remote_address: None,
                attributes: BTreeMap::new(),
            },
        }
    }

    /// URI of the upgrade request.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Headers of the upgrade request (server side) or response (client side).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sub-protocol agreed on during the handshake, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Name of the authenticated principal, if the runtime knows one.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Builder for [`HandshakeInfo`].
#[derive(Debug)]
pub struct HandshakeInfoBuilder {
    info: HandshakeInfo,
}

impl HandshakeInfoBuilder {
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.info.headers = headers;
        self
    }

    pub fn subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.info.subprotocol = subprotocol.filter(|p| !p.is_empty());
        self
    }

    pub fn principal(mut self, principal: Option<String>) -> Self {
        self.info.principal = principal;
        self
    }

    pub fn local_address(mut self, addr: Option<SocketAddr>) -> Self {
        self.info.local_address = addr;
        self
    }

    pub fn remote_address(mut self, addr: Option<SocketAddr>) -> Self {
        self.info.remote_address = addr;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> HandshakeInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_builder_populates_every_field() {
        let mut headers = HeaderMap::new();
        headers.insert("x-room", HeaderValue::from_static("lobby"));
        let remote: SocketAddr = "10.0.0.2:55000".parse().unwrap();

        let info = HandshakeInfo::builder(Uri::from_static("ws://example.com/chat"))
            .headers(headers)
            .subprotocol(Some("chat.v1".to_string()))
            .principal(Some("alice".to_string()))
            .remote_address(Some(remote))
            .attribute("tenant", "acme")
            .build();

        assert_eq!(info.uri().path(), "/chat");
        assert_eq!(info.headers()["x-room"], "lobby");
        assert_eq!(info.subprotocol(), Some("chat.v1"));
        assert_eq!(info.principal(), Some("alice"));
        assert_eq!(info.remote_address(), Some(remote));
        assert_eq!(info.local_address(), None);
        assert_eq!(info.attribute("tenant"), Some("acme"));
    }

    #[test]
    fn test_empty_subprotocol_is_none() {
        let info = HandshakeInfo::builder(Uri::from_static("/ws"))
            .subprotocol(Some(String::new()))
            .build();
        assert_eq!(info.subprotocol(), None);
    }
}
