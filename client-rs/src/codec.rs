//! Frame codecs
//!
//! Envelopes travel as CBOR by default. JSON is available for peers and
//! tooling that want a readable wire.

use crate::error::{PulseError, Result};
use crate::messages::{Envelope, Inbound};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Encodes outbound envelopes and decodes inbound frames
pub trait Codec: Send + Sync + fmt::Debug {
    /// Encode an arbitrary value
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a frame into an arbitrary value
    fn decode_value(&self, frame: &[u8]) -> Result<Value>;

    /// Encode an outbound envelope (payload normalization included)
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.encode_value(&envelope.to_value())
    }

    /// Decode an inbound frame into a typed envelope
    fn decode(&self, frame: &[u8]) -> Result<Inbound> {
        Inbound::from_value(self.decode_value(frame)?)
    }
}

/// Binary CBOR codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| PulseError::Codec(e.to_string()))?;
        Ok(buf)
    }

    fn decode_value(&self, frame: &[u8]) -> Result<Value> {
        ciborium::from_reader(frame).map_err(|e| PulseError::Codec(e.to_string()))
    }
}

/// Text JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode_value(&self, frame: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Wire format selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Cbor,
    Json,
}

impl WireFormat {
    pub fn codec(self) -> Arc<dyn Codec> {
        match self {
            WireFormat::Cbor => Arc::new(CborCodec),
            WireFormat::Json => Arc::new(JsonCodec),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cbor" => Ok(WireFormat::Cbor),
            "json" => Ok(WireFormat::Json),
            other => Err(PulseError::Codec(format!(
                "unknown wire format '{}': expected cbor or json",
                other
            ))),
        }
    }
}
