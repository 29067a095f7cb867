//! WebSocket transport

use super::{async_trait, FrameSink, FrameSource, Transport};
use crate::error::{PulseError, Result};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket per session; frames go out as binary messages
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// `http(s)://` URLs are rewritten to `ws(s)://`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: http_to_ws_scheme(&url.into()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        debug!("Connecting to {}", self.url);
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PulseError::Connection(e.to_string()))?;

        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsSink { sink }),
            Box::new(WsSource { stream }),
        ))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| PulseError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| PulseError::Transport(e.to_string()))
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Some(Ok(data.to_vec())),
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(PulseError::Transport(e.to_string()))),
                None => return None,
            }
        }
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme, passing `ws://`/`wss://` through.
fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}
