//! Connection configuration.
//!
//! [`ConnectionConfig`] carries every tunable of a connection and can be
//! loaded from JSON (all fields default). [`ConnectionBuilder`] offers the
//! same settings as a fluent API.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use gnutella_wire::config::{ConnectionBuilder, QueueConfig};
//!
//! let config = ConnectionBuilder::new()
//!     .handshake_timeout(Duration::from_secs(8))
//!     .enable_deflate(false)
//!     .queue(QueueConfig::Basic)
//!     .header("User-Agent", "demo/1.0")
//!     .config();
//!
//! assert_eq!(config.handshake_timeout(), Duration::from_secs(8));
//! assert!(!config.enable_deflate);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GnutellaError, Result};
use crate::handshake::HandshakeHeaders;
use crate::protocol::DEFAULT_MAX_PAYLOAD_LENGTH;
use crate::queue::{BasicQueue, CompositeQueue, CompositeQueueConfig, MessageQueue};

/// Default read chunk size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default capacity of the in-memory write sink, in bytes.
pub const DEFAULT_SINK_CAPACITY: usize = 64 * 1024;

/// Default maximum number of handshake headers accepted per block.
pub const DEFAULT_MAX_HEADERS: usize = 100;

/// Default maximum length of one handshake line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 15_000;

/// Which scheduling policy the writer uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum QueueConfig {
    /// Strict FIFO.
    Basic,
    /// Priority categories with fairness, expiry and drop policy.
    Composite(CompositeQueueConfig),
}

impl QueueConfig {
    /// Build the queue this configuration describes.
    pub fn build(&self) -> Box<dyn MessageQueue + Send> {
        match self {
            QueueConfig::Basic => Box::new(BasicQueue::new()),
            QueueConfig::Composite(config) => Box::new(CompositeQueue::with_config(config.clone())),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::Composite(CompositeQueueConfig::default())
    }
}

/// Tunables for a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound for a declared payload length.
    pub max_payload_length: u32,
    /// Hops / TTL + hops bound for non-reply messages. Off when `None`.
    pub soft_max_hops: Option<u8>,
    /// Bytes read from the transport per call.
    pub read_buffer_size: usize,
    /// Bytes the writer may stage before it has to wait for the transport.
    pub sink_capacity: usize,
    /// Maximum headers per handshake block.
    pub max_headers: usize,
    /// Maximum length of a handshake line.
    pub max_line_length: usize,
    /// Handshake deadline in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Accept exact `CONNECT/0.4` peers without header exchange.
    pub allow_legacy: bool,
    /// Offer and accept `deflate` content encoding.
    pub enable_deflate: bool,
    /// Headers we send during the handshake.
    pub headers: HandshakeHeaders,
    /// Outgoing scheduling policy.
    pub queue: QueueConfig,
}

impl ConnectionConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GnutellaError::Precondition(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the writer or reader could never make
    /// progress.
    pub fn validate(&self) -> Result<()> {
        if self.sink_capacity == 0 {
            return Err(GnutellaError::Precondition(
                "Invalid configuration: sink_capacity must be non-zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(GnutellaError::Precondition(
                "Invalid configuration: read_buffer_size must be non-zero".into(),
            ));
        }
        if let QueueConfig::Composite(queue) = &self.queue {
            if let Some(category) = queue.cycles.zero_category() {
                return Err(GnutellaError::Precondition(format!(
                    "Invalid configuration: cycle size for {:?} must be non-zero",
                    category
                )));
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GnutellaError::Precondition(format!("Invalid configuration: {}", e)))
    }

    /// Handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            soft_max_hops: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            max_headers: DEFAULT_MAX_HEADERS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            allow_legacy: false,
            enable_deflate: true,
            headers: HandshakeHeaders::new(),
            queue: QueueConfig::default(),
        }
    }
}

/// Fluent builder for [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Set the maximum accepted payload length.
    ///
    /// Default: 65536
    pub fn max_payload_length(mut self, length: u32) -> Self {
        self.config.max_payload_length = length;
        self
    }

    /// Enforce a hops soft maximum on incoming non-reply messages.
    ///
    /// Default: off
    pub fn soft_max_hops(mut self, hops: u8) -> Self {
        self.config.soft_max_hops = Some(hops);
        self
    }

    /// Set the read chunk size.
    ///
    /// Default: 8 KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the write sink capacity.
    ///
    /// Default: 64 KB
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.config.sink_capacity = capacity;
        self
    }

    /// Set the handshake header count limit.
    ///
    /// Default: 100
    pub fn max_headers(mut self, count: usize) -> Self {
        self.config.max_headers = count;
        self
    }

    /// Set the handshake line length limit.
    ///
    /// Default: 4096
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.config.max_line_length = length;
        self
    }

    /// Set the handshake timeout.
    ///
    /// Default: 15 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Accept legacy `CONNECT/0.4` peers.
    ///
    /// Default: false
    pub fn allow_legacy(mut self, allow: bool) -> Self {
        self.config.allow_legacy = allow;
        self
    }

    /// Offer and accept deflate compression.
    ///
    /// Default: true
    pub fn enable_deflate(mut self, enable: bool) -> Self {
        self.config.enable_deflate = enable;
        self
    }

    /// Add a handshake header we send.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.config.headers.insert(key, value);
        self
    }

    /// Select the outgoing scheduling policy.
    ///
    /// Default: composite with the standard limits
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config.queue = queue;
        self
    }

    /// Borrow the configuration built so far.
    pub fn config_ref(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Finish and return the configuration without validating it.
    pub fn config(self) -> ConnectionConfig {
        self.config
    }

    /// Finish, validating the configuration.
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_payload_length, 65_536);
        assert_eq!(config.soft_max_hops, None);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(15));
        assert!(!config.allow_legacy);
        assert!(config.enable_deflate);
        assert!(matches!(config.queue, QueueConfig::Composite(_)));
    }

    #[test]
    fn test_builder_configuration() {
        let config = ConnectionBuilder::new()
            .max_payload_length(1024)
            .soft_max_hops(4)
            .read_buffer_size(512)
            .sink_capacity(2048)
            .max_headers(10)
            .max_line_length(256)
            .handshake_timeout(Duration::from_millis(500))
            .allow_legacy(true)
            .enable_deflate(false)
            .queue(QueueConfig::Basic)
            .header("X-Ultrapeer", "False")
            .config();

        assert_eq!(config.max_payload_length, 1024);
        assert_eq!(config.soft_max_hops, Some(4));
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.sink_capacity, 2048);
        assert_eq!(config.max_headers, 10);
        assert_eq!(config.max_line_length, 256);
        assert_eq!(config.handshake_timeout_ms, 500);
        assert!(config.allow_legacy);
        assert!(!config.enable_deflate);
        assert_eq!(config.queue, QueueConfig::Basic);
        assert_eq!(config.headers.get("X-Ultrapeer"), Some("False"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = ConnectionConfig::from_json(
            r#"{"allow_legacy": true, "queue": {"policy": "basic"}}"#,
        )
        .unwrap();
        assert!(config.allow_legacy);
        assert_eq!(config.queue, QueueConfig::Basic);
        assert_eq!(config.max_headers, DEFAULT_MAX_HEADERS);
    }

    #[test]
    fn test_from_json_composite() {
        let config = ConnectionConfig::from_json(
            r#"{"queue": {"policy": "composite", "timeout_ms": 1000, "big_capacity": 5}}"#,
        )
        .unwrap();
        match config.queue {
            QueueConfig::Composite(queue) => {
                assert_eq!(queue.timeout_ms, 1000);
                assert_eq!(queue.big_capacity, 5);
                assert_eq!(queue.small_capacity, 1);
            }
            other => panic!("unexpected queue config: {:?}", other),
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ConnectionBuilder::new().header("User-Agent", "x").config();
        let json = config.to_json().unwrap();
        assert_eq!(ConnectionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_soft_max_from_json() {
        let config = ConnectionConfig::from_json(r#"{"soft_max_hops": 4}"#).unwrap();
        assert_eq!(config.soft_max_hops, Some(4));
    }

    #[test]
    fn test_zero_sink_capacity_rejected() {
        let err = ConnectionConfig::from_json(r#"{"sink_capacity": 0}"#).unwrap_err();
        assert!(err.to_string().contains("sink_capacity"));

        let err = ConnectionBuilder::new().sink_capacity(0).build().unwrap_err();
        assert!(matches!(err, GnutellaError::Precondition(_)));
        assert!(ConnectionBuilder::new().sink_capacity(1).build().is_ok());
    }

    #[test]
    fn test_zero_read_buffer_rejected() {
        let err = ConnectionConfig::from_json(r#"{"read_buffer_size": 0}"#).unwrap_err();
        assert!(err.to_string().contains("read_buffer_size"));
    }

    #[test]
    fn test_zero_cycle_size_rejected() {
        let err = ConnectionConfig::from_json(
            r#"{"queue": {"policy": "composite", "cycles": {"reply": 0}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Reply"));

        let mut queue = CompositeQueueConfig::default();
        queue.cycles.ping = 0;
        let err = ConnectionBuilder::new()
            .queue(QueueConfig::Composite(queue))
            .build()
            .unwrap_err();
        assert!(matches!(err, GnutellaError::Precondition(_)));
    }

    #[test]
    fn test_invalid_json() {
        let err = ConnectionConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, GnutellaError::Precondition(_)));
    }
}
