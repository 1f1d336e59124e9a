// Transport capability for the primary chat connection.
//
// The connection manager only ever talks to these traits; the concrete
// websocket implementation lives here and a scripted mock lives in the tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// What a live link reports back to its driver
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A text frame from the server, handed to the UI untouched
    Frame(String),
    /// The peer closed the link; `normal` is true for a normal-closure code
    Closed { normal: bool },
    /// The link failed mid-stream
    Failed(String),
}

/// Factory for transport links. One link per active chat view.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// A live bidirectional link to the chat backend.
#[async_trait]
pub trait TransportLink: Send {
    /// Write one text frame. An error here means the link is unusable.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Wait for the next link event. `None` means the stream ended without
    /// a close frame.
    async fn next_event(&mut self) -> Option<LinkEvent>;

    /// Close the link with a normal-closure code. Best effort.
    async fn close(&mut self);
}

/// Production transport over a websocket.
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        debug!("Opening websocket transport");
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(LinkEvent::Frame(text)),
                Ok(Message::Close(frame)) => {
                    let normal = frame
                        .as_ref()
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(true);
                    return Some(LinkEvent::Closed { normal });
                }
                // The websocket layer answers pings itself; nothing to do
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => {
                    debug!("Ignoring non-text websocket message: {:?}", other);
                    continue;
                }
                Err(e) => return Some(LinkEvent::Failed(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            warn!("Error closing websocket: {}", e);
        }
    }
}
