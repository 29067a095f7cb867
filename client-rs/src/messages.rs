//! Envelope types for the pulsebus protocol
//!
//! Outbound traffic is a single-key map `{ Tag: payload }`. Inbound traffic is
//! a map carrying an `event` discriminator plus event-specific fields.

use crate::error::{PulseError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Discriminator field of inbound envelopes
pub const EVENT_FIELD: &str = "event";

/// Server greeting carrying the protocol version; consumed by the client
pub const HELLO_EVENT: &str = "Hello";

/// Client answer to `Hello`
pub const HELLO_REPLY_TAG: &str = "HelloReply";

/// Generic error event every outstanding request may race against
pub const ERROR_EVENT: &str = "Error";

/// Outbound channel subscription request
pub const SUBSCRIBE_TAG: &str = "Subscribe";

/// Synthesized event announcing the first data on a subscribed channel
pub const JOIN_EVENT: &str = "join";

/// An outbound message: exactly one tag mapped to one payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    tag: String,
    payload: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload
    pub fn new<T: Serialize>(tag: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::from_value(tag, serde_json::to_value(payload)?))
    }

    /// Build an envelope from an already-built JSON value
    pub fn from_value(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// An envelope with no payload (`{ Tag: null }`)
    pub fn unit(tag: impl Into<String>) -> Self {
        Self::from_value(tag, Value::Null)
    }

    /// Handshake reply carrying the acknowledgment string and bearer token
    pub fn hello_reply(ack: &str, token: &str) -> Self {
        Self::from_value(
            HELLO_REPLY_TAG,
            serde_json::json!({ "ack": ack, "token": token }),
        )
    }

    /// Subscription request for one channel
    pub fn subscribe(channel: &str) -> Self {
        Self::from_value(SUBSCRIBE_TAG, serde_json::json!({ "channel": channel }))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The wire shape of this envelope.
    ///
    /// An object payload with no keys becomes `null`, so `{Foo: {}}` and
    /// `{Foo: null}` encode to the same bytes.
    pub fn to_value(&self) -> Value {
        let payload = match &self.payload {
            Value::Object(map) if map.is_empty() => Value::Null,
            other => other.clone(),
        };
        let mut map = Map::with_capacity(1);
        map.insert(self.tag.clone(), payload);
        Value::Object(map)
    }
}

/// `Hello` greeting fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Server protocol version; `None` if missing or not a string
    pub version: Option<String>,
}

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake greeting, never forwarded to handlers
    Hello(Hello),
    /// The generic `Error` event
    Error(Event),
    /// Any other named event
    Event(Event),
}

impl Inbound {
    /// Interpret a decoded frame
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(PulseError::Protocol("frame is not a map".into()));
        };

        let name = match fields.remove(EVENT_FIELD) {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(PulseError::Protocol(format!(
                    "event discriminator is not a string: {}",
                    other
                )))
            }
            None => return Err(PulseError::Protocol("missing event field".into())),
        };

        Ok(match name.as_str() {
            HELLO_EVENT => Inbound::Hello(Hello {
                version: fields
                    .get("version")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            }),
            ERROR_EVENT => Inbound::Error(Event::new(name, fields)),
            _ => Inbound::Event(Event::new(name, fields)),
        })
    }
}

/// A named inbound event as delivered to handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    fields: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The synthesized `join` event for a channel
    pub fn join(channel: &str) -> Self {
        let mut fields = Map::with_capacity(1);
        fields.insert("channel".to_string(), Value::String(channel.to_string()));
        Self::new(JOIN_EVENT, fields)
    }

    /// Event name (the inbound `event` discriminator)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up one field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All fields except the discriminator
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Whether this is the first-data marker of a subscribed channel
    pub fn is_join(&self) -> bool {
        self.name == JOIN_EVENT
    }

    /// Human-readable message of an `Error` event
    pub fn message(&self) -> String {
        ["message", "error"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| Value::Object(self.fields.clone()).to_string())
    }

    /// Map the fields into a typed structure
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// The event as it appeared on the wire, discriminator included
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(EVENT_FIELD.to_string(), Value::String(self.name.clone()));
        Value::Object(map)
    }
}
