//! Transports carrying whole binary frames
//!
//! The client only needs ordered frame delivery once a transport is open:
//! - WebSocket: the production transport (`tokio-tungstenite`)
//! - Memory: an in-process peer for tests and embedding

mod memory;
mod websocket;

pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use websocket::WebSocketTransport;

use crate::error::Result;
pub use async_trait::async_trait;

/// Write half of an open transport
#[async_trait]
pub trait FrameSink: Send {
    /// Send one binary frame
    async fn send(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open transport
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame: `Some(Err(_))` on a transport error, `None` once closed
    async fn recv(&mut self) -> Option<Result<Vec<u8>>>;
}

/// Something that can open a fresh duplex connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}
