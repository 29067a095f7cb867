//! pulsebus client implementation
//!
//! One transport session at a time, driven by a spawned connection task.
//! Sends issued before the handshake completes wait in a FIFO pending queue
//! and are written, in order, right after `HelloReply`.

use crate::codec::Codec;
use crate::config::PulseConfig;
use crate::credentials::{CookieCredentials, CookieJar, CredentialProvider};
use crate::dispatcher::{Handler, HandlerRegistry};
use crate::error::{PulseError, Result};
use crate::messages::{Envelope, Event, Hello, Inbound};
use crate::subscriptions::SubscriptionSet;
use crate::transport::{Transport, WebSocketTransport};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Protocol version the server must announce in `Hello`
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Acknowledgment string sent in `HelloReply`
pub const HELLO_ACK: &str = "Hello";

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, waiting for the server's `Hello`
    Handshaking,
    /// Handshake done; sends go straight to the wire
    Ready,
    /// Incompatible peer or explicit close; stays here until `reset()`
    Closed,
}

/// Message to send to the connection task
enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Per-session state, guarded by one lock so queueing, flushing and state
/// transitions are seen in a single order.
struct Session {
    id: Option<Uuid>,
    state: ConnectionState,
    pending: VecDeque<Vec<u8>>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    subscriptions: SubscriptionSet,
}

/// Internal client state
pub(crate) struct ClientInner {
    config: PulseConfig,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    pub(crate) registry: Arc<HandlerRegistry>,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

/// Realtime pub/sub client
///
/// Multiplexes every event channel over one duplex connection. Handlers stay
/// registered across reconnects; the pending queue and the subscription set
/// belong to a single session. Cheaply cloneable; clones share one connection.
#[derive(Clone)]
pub struct PulseClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Builder for [`PulseClient`]
pub struct ClientBuilder {
    config: PulseConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    codec: Option<Arc<dyn Codec>>,
}

impl ClientBuilder {
    /// Use a transport other than a WebSocket to `config.url`
    pub fn transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials<C: CredentialProvider + 'static>(self, credentials: C) -> Self {
        self.shared_credentials(Arc::new(credentials))
    }

    pub fn shared_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Read the token from `config.cookie_name` in this jar
    pub fn cookies(self, jar: CookieJar) -> Self {
        let name = self.config.cookie_name.clone();
        self.credentials(CookieCredentials::new(jar, name))
    }

    /// Override the codec chosen by `config.wire_format`
    pub fn codec<C: Codec + 'static>(self, codec: C) -> Self {
        self.shared_codec(Arc::new(codec))
    }

    pub fn shared_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> PulseClient {
        let config = self.config;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new(config.url.clone())));
        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(CookieCredentials::new(
                CookieJar::new(),
                config.cookie_name.clone(),
            ))
        });
        let codec = self.codec.unwrap_or_else(|| config.wire_format.codec());

        let inner = Arc::new(ClientInner {
            config,
            codec,
            transport,
            credentials,
            registry: Arc::new(HandlerRegistry::new()),
            session: Mutex::new(Session {
                id: None,
                state: ConnectionState::Disconnected,
                pending: VecDeque::new(),
                outbound: None,
                subscriptions: SubscriptionSet::new(),
            }),
            state: state_tx,
            state_rx,
        });

        PulseClient { inner }
    }
}

impl PulseClient {
    /// Client with a WebSocket transport, the configured wire format and an
    /// empty cookie jar
    pub fn new(config: PulseConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: PulseConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            credentials: None,
            codec: None,
        }
    }

    pub fn config(&self) -> &PulseConfig {
        &self.inner.config
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Envelopes waiting for the handshake
    pub fn pending_len(&self) -> usize {
        self.inner.session.lock().pending.len()
    }

    /// Registrations for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.registry.count(event)
    }

    /// Channels subscribed in the current session, sorted
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.inner.session.lock().subscriptions.channels()
    }

    /// Open the transport if there is none. Returns immediately; use
    /// [`ready`](Self::ready) to wait for the handshake.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let mut session = self.inner.session.lock();
        match session.state {
            ConnectionState::Disconnected => self.start_session(&mut session),
            ConnectionState::Closed => Err(PulseError::Closed),
            ConnectionState::Connecting
            | ConnectionState::Handshaking
            | ConnectionState::Ready => Ok(()),
        }
    }

    /// Connect if needed and wait until the handshake completes
    pub async fn ready(&self) -> Result<()> {
        let mut state_rx = self.inner.state_rx.clone();
        self.connect()?;

        let wait = async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Ready => return Ok(()),
                    ConnectionState::Closed => return Err(PulseError::Closed),
                    ConnectionState::Disconnected => {
                        return Err(PulseError::Connection(
                            "connection dropped before handshake".into(),
                        ));
                    }
                    ConnectionState::Connecting | ConnectionState::Handshaking => {}
                }

                if state_rx.changed().await.is_err() {
                    return Err(PulseError::Shutdown);
                }
            }
        };

        timeout(self.inner.config.operation_timeout, wait)
            .await
            .map_err(|_| PulseError::Timeout)?
    }

    /// Send an envelope.
    ///
    /// When ready it goes straight to the wire. Otherwise it is queued and,
    /// if no transport is being opened, a connection is started. Queued
    /// envelopes are lost if the session drops before the handshake.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        let frame = self.inner.codec.encode(&envelope)?;
        let mut session = self.inner.session.lock();
        self.send_frame(&mut session, envelope.tag(), frame)
    }

    /// Register `handler` for `event`, after any existing handlers
    pub fn on(&self, event: &str, handler: Handler) {
        self.inner.registry.on(event, handler);
    }

    /// Register a closure for `event`, returning the handle needed to remove it
    pub fn listen<F>(&self, event: &str, f: F) -> Handler
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler = Handler::new(f);
        self.on(event, handler.clone());
        handler
    }

    /// Remove the first registration of `handler` for `event`; a no-op if
    /// there is none
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        self.inner.registry.off(event, handler)
    }

    /// Subscribe to channels not yet subscribed in this session
    pub fn subscribe<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for channel in channels {
            let channel = channel.as_ref();
            let envelope = Envelope::subscribe(channel);
            let frame = self.inner.codec.encode(&envelope)?;

            // A Subscribe is always recorded in the session it is queued on
            let mut session = self.inner.session.lock();
            if !session.subscriptions.claim(channel) {
                continue;
            }
            if let Err(e) = self.send_frame(&mut session, envelope.tag(), frame) {
                session.subscriptions.release(channel);
                return Err(e);
            }
            debug!(channel, subscribed = session.subscriptions.len(), "Subscribed");
        }

        Ok(())
    }

    /// Drop the transport and the pending queue; handlers stay registered.
    /// The next send reconnects.
    pub fn reset(&self) {
        let mut session = self.inner.session.lock();
        if let Some(id) = session.id {
            debug!(session = %id, "Resetting connection");
        }
        self.inner.teardown(&mut session, ConnectionState::Disconnected);
    }

    /// Like `reset`, but the client refuses to reconnect until reset
    pub fn close(&self) {
        let mut session = self.inner.session.lock();
        if let Some(id) = session.id {
            debug!(session = %id, "Closing connection");
        }
        self.inner.teardown(&mut session, ConnectionState::Closed);
    }

    fn send_frame(&self, session: &mut Session, tag: &str, frame: Vec<u8>) -> Result<()> {
        match session.state {
            ConnectionState::Ready => {
                let sent = session
                    .outbound
                    .as_ref()
                    .is_some_and(|tx| tx.send(Outbound::Frame(frame)).is_ok());
                if !sent {
                    warn!(tag, "Connection task is gone, dropping session");
                    self.inner.teardown(session, ConnectionState::Disconnected);
                    return Err(PulseError::NotConnected);
                }
                trace!(tag, "Sent");
            }
            ConnectionState::Connecting | ConnectionState::Handshaking => {
                session.pending.push_back(frame);
                trace!(tag, queued = session.pending.len(), "Queued");
            }
            ConnectionState::Disconnected => {
                self.start_session(session)?;
                session.pending.push_back(frame);
                trace!(tag, "Queued, connecting");
            }
            ConnectionState::Closed => return Err(PulseError::Closed),
        }

        Ok(())
    }

    fn start_session(&self, session: &mut Session) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            PulseError::Connection("no Tokio runtime to drive the connection".into())
        })?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        session.id = Some(id);
        session.outbound = Some(tx);
        self.inner.set_state(session, ConnectionState::Connecting);

        debug!(session = %id, url = %self.inner.config.url, "Opening transport");
        runtime.spawn(connection_task(self.inner.clone(), id, rx));
        Ok(())
    }
}

impl fmt::Debug for PulseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("handlers", &self.inner.registry)
            .finish()
    }
}

impl ClientInner {
    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        session.state = state;
        let _ = self.state.send(state);
    }

    fn teardown(&self, session: &mut Session, next: ConnectionState) {
        if let Some(tx) = session.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
        session.id = None;
        session.pending.clear();
        session.subscriptions.clear();
        self.set_state(session, next);
    }

    fn transport_opened(&self, id: Uuid) -> bool {
        let mut session = self.session.lock();
        if session.id != Some(id) || session.state != ConnectionState::Connecting {
            return false;
        }
        self.set_state(&mut session, ConnectionState::Handshaking);
        debug!(session = %id, "Transport open, awaiting Hello");
        true
    }

    fn handle_disconnect(&self, id: Uuid) {
        let mut session = self.session.lock();
        if session.id != Some(id) {
            return;
        }
        if !session.pending.is_empty() {
            warn!(
                session = %id,
                dropped = session.pending.len(),
                "Discarding envelopes queued before the handshake"
            );
        }
        self.teardown(&mut session, ConnectionState::Disconnected);
    }

    fn handle_frame(&self, id: Uuid, frame: &[u8]) {
        let inbound = match self.codec.decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(session = %id, "Failed to decode frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::Hello(hello) => self.handle_hello(id, hello),
            Inbound::Error(event) | Inbound::Event(event) => self.dispatch(id, event),
        }
    }

    fn handle_hello(&self, id: Uuid, hello: Hello) {
        {
            let mut session = self.session.lock();
            if session.id != Some(id) {
                return;
            }
            if session.state != ConnectionState::Handshaking {
                warn!(session = %id, state = ?session.state, "Unexpected Hello, ignoring");
                return;
            }
            if hello.version.as_deref() != Some(PROTOCOL_VERSION) {
                warn!(
                    session = %id,
                    expected = PROTOCOL_VERSION,
                    received = ?hello.version,
                    "Protocol version mismatch, closing connection"
                );
                self.teardown(&mut session, ConnectionState::Closed);
                return;
            }
        }

        // Read at reply time so a rotated token is used
        let token = self.credentials.token().unwrap_or_else(|| {
            warn!(session = %id, "No bearer token available for handshake");
            String::new()
        });

        let reply = match self.codec.encode(&Envelope::hello_reply(HELLO_ACK, &token)) {
            Ok(frame) => frame,
            Err(e) => {
                error!(session = %id, "Failed to encode HelloReply: {}", e);
                self.handle_disconnect(id);
                return;
            }
        };

        let mut session = self.session.lock();
        if session.id != Some(id) || session.state != ConnectionState::Handshaking {
            return;
        }
        let Some(tx) = session.outbound.clone() else {
            return;
        };

        let flushed = session.pending.len();
        let _ = tx.send(Outbound::Frame(reply));
        for frame in session.pending.drain(..) {
            let _ = tx.send(Outbound::Frame(frame));
        }
        self.set_state(&mut session, ConnectionState::Ready);
        info!(session = %id, flushed, "Handshake complete");
    }

    fn dispatch(&self, id: Uuid, event: Event) {
        let join = {
            let mut session = self.session.lock();
            if session.id != Some(id) {
                return;
            }
            session.subscriptions.first_arrival(event.name())
        };

        if join {
            debug!(channel = event.name(), "First data on channel");
            self.registry
                .dispatch(event.name(), &Event::join(event.name()));
        }
        self.registry.dispatch(event.name(), &event);
    }
}

/// Ends the session when the connection task stops, including when a
/// handler panics and unwinds the task. A no-op once the session has been
/// superseded.
struct SessionGuard {
    inner: Arc<ClientInner>,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.handle_disconnect(self.id);
    }
}

/// Main connection task: owns the transport for one session
async fn connection_task(
    inner: Arc<ClientInner>,
    id: Uuid,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let _guard = SessionGuard {
        inner: inner.clone(),
        id,
    };

    let (mut sink, mut source) = match inner.transport.open().await {
        Ok(halves) => halves,
        Err(e) => {
            warn!(session = %id, "Failed to open transport: {}", e);
            inner.handle_disconnect(id);
            return;
        }
    };

    if !inner.transport_opened(id) {
        // Reset or closed while the transport was opening
        let _ = sink.close().await;
        return;
    }

    let result: Result<()> = loop {
        tokio::select! {
            // Handle outbound frames
            msg = rx.recv() => {
                match msg {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = sink.send(frame).await {
                            break Err(e);
                        }
                    }
                    Some(Outbound::Close) | None => break Ok(()),
                }
            }

            // Handle inbound frames
            inbound = source.recv() => {
                match inbound {
                    Some(Ok(frame)) => inner.handle_frame(id, &frame),
                    Some(Err(e)) => break Err(e),
                    None => break Err(PulseError::Connection("Connection closed by server".into())),
                }
            }
        }
    };

    match result {
        Ok(()) => debug!(session = %id, "Session closed by client"),
        Err(e) => {
            warn!(session = %id, "Session dropped: {}", e);
            // Leave Ready before the close is awaited
            inner.handle_disconnect(id);
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::PulseConfig;
    use crate::credentials::StaticToken;
    use crate::transport::{
        async_trait, FrameSink, FrameSource, MemoryPeer, MemoryServer, MemoryTransport,
    };
    use serde_json::{json, Value};
    use std::time::Duration;

    fn memory_client() -> (PulseClient, MemoryServer) {
        let (transport, server) = MemoryTransport::new();
        let client = PulseClient::builder(PulseConfig::new("memory://test"))
            .transport(transport)
            .credentials(StaticToken::new("tok"))
            .codec(JsonCodec)
            .build();
        (client, server)
    }

    fn hello(version: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({"event": "Hello", "version": version})).unwrap()
    }

    async fn next_value(peer: &mut MemoryPeer) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("client closed");
        serde_json::from_slice(&frame).unwrap()
    }

    async fn wait_for_state(client: &PulseClient, want: ConnectionState) {
        let mut rx = client.state_receiver();
        tokio::time::timeout(Duration::from_secs(1), async {
            while *rx.borrow_and_update() != want {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state not reached");
    }

    #[test]
    fn test_client_initial_state() {
        let client = PulseClient::new(PulseConfig::new("ws://localhost:9123/websocket"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.pending_len(), 0);
        assert!(client.subscribed_channels().is_empty());
    }

    #[test]
    fn test_send_outside_runtime_fails_without_queueing() {
        let (client, _server) = memory_client();
        let result = client.send(Envelope::unit("GetConfig"));
        assert!(matches!(result, Err(PulseError::Connection(_))));
        assert_eq!(client.pending_len(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_subscribe_outside_runtime_releases_claim() {
        let (client, _server) = memory_client();
        assert!(client.subscribe(["Throughput"]).is_err());
        assert!(client.subscribed_channels().is_empty());
    }

    #[test]
    fn test_connection_state_copy() {
        let state = ConnectionState::Ready;
        let copy = state;
        assert_eq!(state, copy);
        assert_ne!(ConnectionState::Connecting, ConnectionState::Handshaking);
    }

    #[tokio::test]
    async fn test_send_before_ready_queues_and_connects() {
        let (client, mut server) = memory_client();

        client.send(Envelope::unit("GetConfig")).unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(client.pending_len(), 1);

        client.send(Envelope::unit("GetStats")).unwrap();
        assert_eq!(client.pending_len(), 2);

        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        assert!(peer.try_recv().is_none());
        assert!(server.try_accept().is_none(), "only one transport opened");
    }

    #[tokio::test]
    async fn test_handshake_sends_reply_then_flushes_queue() {
        let (client, mut server) = memory_client();
        client.send(Envelope::unit("GetConfig")).unwrap();

        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        peer.send(hello(PROTOCOL_VERSION));

        assert_eq!(
            next_value(&mut peer).await,
            json!({"HelloReply": {"ack": HELLO_ACK, "token": "tok"}})
        );
        assert_eq!(next_value(&mut peer).await, json!({"GetConfig": null}));
        wait_for_state(&client, ConnectionState::Ready).await;
        assert_eq!(client.pending_len(), 0);

        client.send(Envelope::unit("GetStats")).unwrap();
        assert_eq!(next_value(&mut peer).await, json!({"GetStats": null}));
    }

    #[tokio::test]
    async fn test_version_mismatch_closes_without_reply() {
        let (client, mut server) = memory_client();
        client.send(Envelope::unit("GetConfig")).unwrap();

        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        peer.send(hello("0.0.0-incompatible"));

        let closed = tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .unwrap();
        assert!(closed.is_none(), "no frame may follow a version mismatch");
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.pending_len(), 0);

        assert!(matches!(
            client.send(Envelope::unit("GetConfig")),
            Err(PulseError::Closed)
        ));
        assert!(matches!(client.connect(), Err(PulseError::Closed)));
    }

    #[tokio::test]
    async fn test_missing_version_closes() {
        let (client, mut server) = memory_client();
        client.connect().unwrap();

        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        peer.send(serde_json::to_vec(&json!({"event": "Hello"})).unwrap());

        wait_for_state(&client, ConnectionState::Closed).await;
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reset_after_close_allows_reconnect() {
        let (client, mut server) = memory_client();
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);

        client.reset();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.connect().unwrap();
        assert!(server.accept().await.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_frame_keeps_connection() {
        let (client, mut server) = memory_client();
        client.connect().unwrap();
        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;

        peer.send(b"\x00garbage".to_vec());
        peer.send(hello(PROTOCOL_VERSION));

        assert!(next_value(&mut peer).await.get("HelloReply").is_some());
        wait_for_state(&client, ConnectionState::Ready).await;
    }

    #[tokio::test]
    async fn test_open_failure_drops_queue() {
        let (transport, _server) = MemoryTransport::new();
        transport.set_refuse(true);
        let client = PulseClient::builder(PulseConfig::new("memory://test"))
            .transport(transport)
            .codec(JsonCodec)
            .build();

        client.send(Envelope::unit("GetConfig")).unwrap();
        wait_for_state(&client, ConnectionState::Disconnected).await;
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_ready_waits_for_handshake() {
        let (client, mut server) = memory_client();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.ready().await })
        };

        let mut peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        peer.send(hello(PROTOCOL_VERSION));

        waiter.await.unwrap().unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_ready_reports_closed_on_mismatch() {
        let (client, mut server) = memory_client();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.ready().await })
        };

        let peer = server.accept().await.unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        peer.send(hello("bogus"));

        assert!(matches!(waiter.await.unwrap(), Err(PulseError::Closed)));
    }

    #[tokio::test]
    async fn test_listen_and_off() {
        let (client, _server) = memory_client();
        let handler = client.listen("Throughput", |_| {});
        assert_eq!(client.handler_count("Throughput"), 1);
        assert!(client.off("Throughput", &handler));
        assert!(!client.off("Throughput", &handler));
        assert_eq!(client.handler_count("Throughput"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_racing_reset_keeps_record_and_queue_in_step() {
        let (client, _server) = memory_client();

        let subscriber = {
            let client = client.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..2000 {
                    let _ = client.subscribe(["Throughput"]);
                }
            })
        };
        let resetter = {
            let client = client.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..2000 {
                    client.reset();
                }
            })
        };
        subscriber.await.unwrap();
        resetter.await.unwrap();

        // Every queued Subscribe is recorded, and every record was queued
        assert_eq!(client.pending_len(), client.subscribed_channels().len());
        assert!(client.pending_len() <= 1);
    }

    /// Transport whose close never completes; the test drives inbound frames
    struct StallingTransport {
        source: Mutex<Option<mpsc::UnboundedReceiver<Result<Vec<u8>>>>>,
    }

    struct StallingSink;

    #[async_trait]
    impl FrameSink for StallingSink {
        async fn send(&mut self, _frame: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            std::future::pending().await
        }
    }

    struct ScriptedSource(mpsc::UnboundedReceiver<Result<Vec<u8>>>);

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
            self.0.recv().await
        }
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
            let source = self
                .source
                .lock()
                .take()
                .ok_or_else(|| PulseError::Connection("already opened".into()))?;
            Ok((Box::new(StallingSink), Box::new(ScriptedSource(source))))
        }
    }

    #[tokio::test]
    async fn test_transport_error_leaves_ready_before_close_completes() {
        let (inbound, source) = mpsc::unbounded_channel();
        let client = PulseClient::builder(PulseConfig::new("memory://test"))
            .transport(StallingTransport {
                source: Mutex::new(Some(source)),
            })
            .codec(JsonCodec)
            .build();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Handshaking).await;
        inbound.send(Ok(hello(PROTOCOL_VERSION))).unwrap();
        wait_for_state(&client, ConnectionState::Ready).await;

        inbound
            .send(Err(PulseError::Transport("connection reset".into())))
            .unwrap();
        wait_for_state(&client, ConnectionState::Disconnected).await;
    }
}
