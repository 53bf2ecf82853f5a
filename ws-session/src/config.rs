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

//! Transport configuration.
//!
//! Values are read from environment variables with the `WS_SESSION_` prefix;
//! anything unset or unparsable falls back to its default.

use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable prefix for transport settings
const ENV_PREFIX: &str = "WS_SESSION_";

/// Default depth of bounded inbound queues, in frames
pub const DEFAULT_INBOUND_CAPACITY: usize = 100;

/// Default upper bound on a single inbound message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Default time allowed for the close frame to be flushed
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum number of frames a binding may queue per direction before the
    /// producer is suspended.
    /// Env: WS_SESSION_INBOUND_CAPACITY
    pub inbound_capacity: usize,
    /// Env: WS_SESSION_MAX_MESSAGE_SIZE
    pub max_message_size: usize,
    /// Env: WS_SESSION_CLOSE_TIMEOUT_MS
    pub close_timeout: Duration,
    /// Sub-protocols a server binding is willing to negotiate, in preference order.
    /// Env: WS_SESSION_SUBPROTOCOLS=chat.v2,chat.v1
    pub subprotocols: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            subprotocols: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, which maps a full variable name such
    /// as `WS_SESSION_INBOUND_CAPACITY` to its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        Self {
            inbound_capacity: parse_value(read("INBOUND_CAPACITY"))
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.inbound_capacity),
            max_message_size: parse_value(read("MAX_MESSAGE_SIZE"))
                .filter(|size| *size > 0)
                .unwrap_or(defaults.max_message_size),
            close_timeout: parse_value(read("CLOSE_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_timeout),
            subprotocols: read("SUBPROTOCOLS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.subprotocols),
        }
    }

    /// Process-wide settings, loaded on first access.
    pub fn global() -> &'static Self {
        static CONFIG: OnceLock<TransportConfig> = OnceLock::new();
        CONFIG.get_or_init(TransportConfig::from_env)
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// First client-offered sub-protocol that this configuration supports.
    ///
    /// `offered` is the raw `Sec-WebSocket-Protocol` header value.
    pub fn negotiate_subprotocol(&self, offered: &str) -> Option<String> {
        let offered = parse_list(offered);
        self.subprotocols
            .iter()
            .find(|supported| offered.iter().any(|o| o.eq_ignore_ascii_case(supported)))
            .cloned()
    }
}

fn parse_value<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = TransportConfig::from_lookup(lookup(&[]));
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.close_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = TransportConfig::from_lookup(lookup(&[
            ("WS_SESSION_INBOUND_CAPACITY", "8"),
            ("WS_SESSION_CLOSE_TIMEOUT_MS", " 250 "),
            ("WS_SESSION_SUBPROTOCOLS", "chat.v2, chat.v1"),
        ]));
        assert_eq!(config.inbound_capacity, 8);
        assert_eq!(config.close_timeout, Duration::from_millis(250));
        assert_eq!(config.subprotocols, vec!["chat.v2", "chat.v1"]);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = TransportConfig::from_lookup(lookup(&[
            ("WS_SESSION_MAX_MESSAGE_SIZE", "lots"),
            ("WS_SESSION_INBOUND_CAPACITY", "0"),
        ]));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.inbound_capacity, DEFAULT_INBOUND_CAPACITY);
    }

    #[test]
    fn test_negotiate_subprotocol_prefers_server_order() {
        let config = TransportConfig::default().with_subprotocols(["chat.v2", "chat.v1"]);
        assert_eq!(
            config.negotiate_subprotocol("chat.v1, chat.v2"),
            Some("chat.v2".to_string())
        );
        assert_eq!(config.negotiate_subprotocol("mqtt"), None);
        assert_eq!(TransportConfig::default().negotiate_subprotocol("chat.v1"), None);
    }

    #[test]
    fn test_inbound_capacity_never_zero() {
        let config = TransportConfig::default().with_inbound_capacity(0);
        assert_eq!(config.inbound_capacity, 1);
    }
}
