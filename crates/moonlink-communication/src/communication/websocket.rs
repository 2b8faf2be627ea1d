//! WebSocket transport
//!
//! Connects with `tokio-tungstenite` and exposes the socket as a
//! [`Channel`]. Text frames carry the JSON-RPC envelopes; binary frames are
//! accepted when they hold UTF-8; ping/pong is handled by tungstenite.

use super::{Channel, Connector, FrameSink, FrameStream};
use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use moonlink_core::ConnectionError;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new WebSocket connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Channel, ConnectionError> {
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            return Err(ConnectionError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }

        debug!(endpoint = %endpoint, "Opening WebSocket");

        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, stream) = ws.split();

        debug!(endpoint = %endpoint, "WebSocket connected");
        Ok(Channel::new(WsFrameSink { sink }, WsFrameStream { stream }))
    }
}

struct WsFrameSink {
    sink: SplitSink<WsConnection, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectionError::SendFailed {
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ConnectionError::WebSocketError {
                reason: e.to_string(),
            }),
        }
    }
}

struct WsFrameStream {
    stream: SplitStream<WsConnection>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_text(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("Dropping non UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Peer closed WebSocket");
                    return None;
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) => return None,
                Some(Err(e)) => {
                    return Some(Err(ConnectionError::ConnectionLost {
                        reason: e.to_string(),
                    }))
                }
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_endpoint() {
        let err = WebSocketConnector::new()
            .connect("http://printer.local/websocket")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_handshake_error() {
        // Port 9 (discard) on loopback is not expected to accept WebSocket upgrades
        let err = WebSocketConnector::new()
            .connect("ws://127.0.0.1:9/websocket")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake { .. }));
    }
}
