//! pulsebus Rust client
//!
//! A realtime pub/sub client that multiplexes many event channels over one
//! duplex connection. The server opens with a versioned `Hello`; envelopes
//! sent before the handshake completes are queued and flushed in order.
//! Call/response is layered on the bus with fire-once listeners that race
//! the expected reply against the generic `Error` event.
//!
//! # Example
//!
//! ```no_run
//! use pulsebus_client::{CookieJar, Envelope, Expect, PulseClient, PulseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let jar = CookieJar::from_header("User-Token=your-token");
//!     let client = PulseClient::builder(PulseConfig::new("wss://dash.example.com/websocket"))
//!         .cookies(jar)
//!         .build();
//!
//!     // Channel updates, including the synthesized `join` on first data
//!     client.listen("Throughput", |event| {
//!         if event.is_join() {
//!             println!("Throughput is live");
//!         } else {
//!             println!("{:?}", event.fields());
//!         }
//!     });
//!     client.subscribe(["Throughput", "WorstRTT"])?;
//!
//!     // Request/response racing the generic Error event
//!     let config = client
//!         .call(
//!             Envelope::unit("GetConfig"),
//!             Expect::event("GetConfigResult").or_error(),
//!         )
//!         .await?;
//!     println!("{:?}", config.fields());
//!
//!     Ok(())
//! }
//! ```

mod client;
mod codec;
mod config;
mod context;
mod correlator;
mod credentials;
mod dispatcher;
mod error;
mod messages;
mod private;
mod subscriptions;
pub mod transport;

pub use client::{ClientBuilder, ConnectionState, PulseClient, HELLO_ACK, PROTOCOL_VERSION};
pub use codec::{CborCodec, Codec, JsonCodec, WireFormat};
pub use config::{PulseConfig, DEFAULT_COOKIE_NAME};
pub use context::ClientContext;
pub use correlator::{Expect, Outcome, Pending};
pub use credentials::{CookieCredentials, CookieJar, CredentialProvider, StaticToken};
pub use dispatcher::{Handler, HandlerRegistry};
pub use error::{PulseError, Result};
pub use messages::{
    Envelope, Event, Hello, Inbound, ERROR_EVENT, HELLO_EVENT, HELLO_REPLY_TAG, JOIN_EVENT,
    SUBSCRIBE_TAG,
};
pub use private::PrivateChannel;
pub use subscriptions::SubscriptionSet;
pub use transport::{
    FrameSink, FrameSource, MemoryPeer, MemoryServer, MemoryTransport, Transport,
    WebSocketTransport,
};
