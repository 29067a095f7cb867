//! Application-owned access to the shared client
//!
//! The application root owns one `ClientContext` and passes it (or clones
//! of the client it hands out) to whatever needs the bus.

use crate::client::PulseClient;
use crate::codec::Codec;
use crate::config::PulseConfig;
use crate::credentials::{CookieCredentials, CookieJar, CredentialProvider};
use crate::transport::{Transport, WebSocketTransport};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Owns configuration and collaborators; builds the client on first use
pub struct ClientContext {
    config: PulseConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    codec: Option<Arc<dyn Codec>>,
    client: Mutex<Option<PulseClient>>,
}

impl ClientContext {
    /// WebSocket to `config.url`, token from `config.cookie_name` in `jar`
    pub fn new(config: PulseConfig, jar: CookieJar) -> Self {
        let transport = Arc::new(WebSocketTransport::new(config.url.clone()));
        let credentials = Arc::new(CookieCredentials::new(jar, config.cookie_name.clone()));
        Self::with_parts(config, transport, credentials)
    }

    pub fn with_parts(
        config: PulseConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            codec: None,
            client: Mutex::new(None),
        }
    }

    /// Override the codec chosen by `config.wire_format`
    pub fn with_codec<C: Codec + 'static>(mut self, codec: C) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// The shared client, created on the first call. Every call returns a
    /// handle to the same client.
    pub fn client(&self) -> PulseClient {
        self.client
            .lock()
            .get_or_insert_with(|| self.build_client())
            .clone()
    }

    /// Whether `client()` has been called yet
    pub fn is_initialized(&self) -> bool {
        self.client.lock().is_some()
    }

    /// Reset the shared client's connection. Handlers stay registered;
    /// callers re-subscribe on the same client.
    pub fn reset(&self) {
        let client = self.client.lock().clone();
        if let Some(client) = client {
            client.reset();
        }
    }

    fn build_client(&self) -> PulseClient {
        let builder = PulseClient::builder(self.config.clone())
            .shared_transport(self.transport.clone())
            .shared_credentials(self.credentials.clone());
        match &self.codec {
            Some(codec) => builder.shared_codec(codec.clone()).build(),
            None => builder.build(),
        }
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("url", &self.config.url)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
