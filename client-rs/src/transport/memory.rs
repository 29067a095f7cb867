//! In-process transport
//!
//! Every `open()` hands a fresh [`MemoryPeer`] to the paired [`MemoryServer`],
//! which plays the server side of the session.

use super::{async_trait, FrameSink, FrameSource, Transport};
use crate::error::{PulseError, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type ServerItem = std::result::Result<Vec<u8>, String>;

/// Client side: implements [`Transport`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
}

/// Server side: receives one peer per opened session
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one session
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: Option<mpsc::UnboundedSender<ServerItem>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse: Arc::new(AtomicBool::new(false)),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Make subsequent `open()` calls fail
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PulseError::Connection("connection refused".into()));
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryPeer {
                to_client: Some(to_client),
                from_client,
            })
            .map_err(|_| PulseError::Connection("memory server is gone".into()))?;

        Ok((
            Box::new(MemorySink {
                tx: Some(client_tx),
            }),
            Box::new(MemorySource { rx: client_rx }),
        ))
    }
}

impl MemoryServer {
    /// Wait for the next session; `None` once every transport is dropped
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// A session opened earlier, without waiting
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl MemoryPeer {
    /// Deliver a frame to the client. Returns false if the session is gone.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Raise a transport error on the client side
    pub fn fail(&self, reason: &str) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Err(reason.to_string())).is_ok())
    }

    /// Close the session from the server side
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client; `None` once the client closed
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// A frame already written by the client, without waiting
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.try_recv().ok()
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| PulseError::Transport("peer went away".into())),
            None => Err(PulseError::NotConnected),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<ServerItem>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx
            .recv()
            .await
            .map(|item| item.map_err(PulseError::Transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_hands_peer_to_server() {
        let (transport, mut server) = MemoryTransport::new();
        let (mut sink, mut source) = transport.open().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        sink.send(b"up".to_vec()).await.unwrap();
        assert_eq!(peer.recv().await, Some(b"up".to_vec()));

        assert!(peer.send(b"down".to_vec()));
        assert_eq!(source.recv().await.unwrap().unwrap(), b"down".to_vec());
    }

    #[tokio::test]
    async fn test_peer_close_ends_client_stream() {
        let (transport, mut server) = MemoryTransport::new();
        let (_sink, mut source) = transport.open().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        peer.close();
        assert!(source.recv().await.is_none());
        assert!(!peer.send(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_peer_fail_raises_transport_error() {
        let (transport, mut server) = MemoryTransport::new();
        let (_sink, mut source) = transport.open().await.unwrap();
        let peer = server.accept().await.unwrap();

        peer.fail("reset");
        assert!(matches!(
            source.recv().await,
            Some(Err(PulseError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn test_client_close_ends_peer_stream() {
        let (transport, mut server) = MemoryTransport::new();
        let (mut sink, _source) = transport.open().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        sink.close().await.unwrap();
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refuse() {
        let (transport, mut server) = MemoryTransport::new();
        transport.set_refuse(true);
        assert!(matches!(
            transport.open().await,
            Err(PulseError::Connection(_))
        ));
        assert!(server.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_open_without_server_fails() {
        let (transport, server) = MemoryTransport::new();
        drop(server);
        assert!(transport.open().await.is_err());
    }
}
