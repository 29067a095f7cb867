//! Configuration for the pulsebus client

use crate::codec::WireFormat;
use std::time::Duration;

/// Cookie holding the bearer token sent in `HelloReply`
pub const DEFAULT_COOKIE_NAME: &str = "User-Token";

/// Configuration for connecting to a pulsebus server
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// Server URL (e.g., "ws://localhost:9123/websocket")
    pub url: String,

    /// Name of the cookie the bearer token is read from at handshake time
    pub cookie_name: String,

    /// Timeout for `ready()` and `call()`
    pub operation_timeout: Duration,

    /// Binary encoding used on the wire
    pub wire_format: WireFormat,
}

impl PulseConfig {
    /// Create a new configuration for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            operation_timeout: Duration::from_secs(10),
            wire_format: WireFormat::Cbor,
        }
    }

    /// Set the cookie the token is read from
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the operation timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the wire format
    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }
}
