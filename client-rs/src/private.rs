//! Per-page private streams
//!
//! A private stream is opened with one envelope `{stream: params}` and
//! answers on a single echoed event. The handle keeps exactly one handler
//! registered for that event until it is closed or dropped.

use crate::client::PulseClient;
use crate::dispatcher::{Handler, HandlerRegistry};
use crate::error::Result;
use crate::messages::{Envelope, Event};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Handle to an open private stream
pub struct PrivateChannel {
    stream: String,
    event: String,
    registry: Arc<HandlerRegistry>,
    handler: Option<Handler>,
}

impl PrivateChannel {
    /// Register `f` for `event`, then request `stream` with `params`.
    ///
    /// The handler is registered first so the first response cannot be
    /// missed. If the request cannot be sent the handler is removed again.
    pub fn open<P, F>(
        client: &PulseClient,
        stream: &str,
        params: &P,
        event: &str,
        f: F,
    ) -> Result<Self>
    where
        P: Serialize,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let request = Envelope::new(stream, params)?;
        let handler = client.listen(event, f);

        if let Err(e) = client.send(request) {
            client.off(event, &handler);
            return Err(e);
        }

        debug!(stream, event, "Opened private stream");
        Ok(Self {
            stream: stream.to_string(),
            event: event.to_string(),
            registry: client.inner.registry.clone(),
            handler: Some(handler),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Event the stream answers on
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_open(&self) -> bool {
        self.handler.is_some()
    }

    /// Unregister the handler
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handler) = self.handler.take() {
            self.registry.off(&self.event, &handler);
            debug!(stream = %self.stream, event = %self.event, "Closed private stream");
        }
    }
}

impl Drop for PrivateChannel {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PrivateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateChannel")
            .field("stream", &self.stream)
            .field("event", &self.event)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::PulseConfig;
    use crate::error::PulseError;
    use crate::transport::{MemoryServer, MemoryTransport};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_client() -> (PulseClient, MemoryServer) {
        let (transport, server) = MemoryTransport::new();
        let client = PulseClient::builder(PulseConfig::new("memory://test"))
            .transport(transport)
            .codec(JsonCodec)
            .build();
        (client, server)
    }

    #[tokio::test]
    async fn test_open_registers_one_handler_and_queues_request() {
        let (client, _server) = memory_client();
        let channel = PrivateChannel::open(
            &client,
            "CircuitFeed",
            &json!({"circuit": 7}),
            "CircuitSample",
            |_| {},
        )
        .unwrap();

        assert_eq!(channel.event(), "CircuitSample");
        assert_eq!(channel.stream(), "CircuitFeed");
        assert_eq!(client.handler_count("CircuitSample"), 1);
        assert_eq!(client.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_handler_receives_stream_events() {
        let (client, _server) = memory_client();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _channel = PrivateChannel::open(&client, "CircuitFeed", &(), "CircuitSample", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let sample = Event::new("CircuitSample", Map::new());
        client.inner.registry.dispatch("CircuitSample", &sample);
        client.inner.registry.dispatch("CircuitSample", &sample);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_unregisters_once() {
        let (client, _server) = memory_client();
        let other = client.listen("CircuitSample", |_| {});
        let channel =
            PrivateChannel::open(&client, "CircuitFeed", &(), "CircuitSample", |_| {}).unwrap();
        assert_eq!(client.handler_count("CircuitSample"), 2);

        channel.close();
        assert_eq!(client.handler_count("CircuitSample"), 1);
        assert!(client.off("CircuitSample", &other));
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let (client, _server) = memory_client();
        {
            let _channel =
                PrivateChannel::open(&client, "CircuitFeed", &(), "CircuitSample", |_| {})
                    .unwrap();
            assert_eq!(client.handler_count("CircuitSample"), 1);
        }
        assert_eq!(client.handler_count("CircuitSample"), 0);
    }

    #[test]
    fn test_send_failure_leaves_no_handler() {
        let (client, _server) = memory_client();
        client.close();
        let result = PrivateChannel::open(&client, "CircuitFeed", &(), "CircuitSample", |_| {});
        assert!(matches!(result, Err(PulseError::Closed)));
        assert_eq!(client.handler_count("CircuitSample"), 0);
    }
}
