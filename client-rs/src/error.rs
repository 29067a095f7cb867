//! Error types for the pulsebus client

use thiserror::Error;

/// Errors that can occur when using the pulsebus client
#[derive(Error, Debug)]
pub enum PulseError {
    /// Opening the transport failed, or the session dropped before it was ready
    #[error("Connection error: {0}")]
    Connection(String),

    /// No live transport to write to
    #[error("Not connected")]
    NotConnected,

    /// The connection was closed (incompatible peer or explicit close) and
    /// stays closed until reset
    #[error("Connection closed")]
    Closed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Server answered with the generic `Error` event
    #[error("Server error: {0}")]
    Server(String),

    /// Failed to serialize/deserialize a JSON value
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to encode/decode a binary frame
    #[error("Codec error: {0}")]
    Codec(String),

    /// Transport read/write error
    #[error("Transport error: {0}")]
    Transport(String),

    /// A decoded frame does not follow envelope conventions
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client has been shut down
    #[error("Client shut down")]
    Shutdown,
}

/// Result type for pulsebus operations
pub type Result<T> = std::result::Result<T, PulseError>;
