//! WebSocket transport implementation

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use relay_proto::NODE_NAME_HEADER;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace};

/// WebSocket transport to the coordinator.
///
/// Control messages travel as binary frames. The node identifies itself
/// at handshake time via the `server-name` request header.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connected: bool,
}

impl WebSocketTransport {
    /// Connect to the coordinator endpoint (`ws://` or `wss://`)
    pub async fn connect(endpoint: &str, node_name: &str) -> Result<Self, TransportError> {
        debug!(endpoint = %endpoint, "Connecting to coordinator");

        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        let name = HeaderValue::from_str(node_name)
            .map_err(|e| TransportError::InvalidEndpoint(format!("bad node name: {}", e)))?;
        request.headers_mut().insert(NODE_NAME_HEADER, name);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        debug!("Control channel connected");

        Ok(Self {
            stream,
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionClosed);
        }

        trace!("Sending {} byte frame", frame.len());

        self.stream
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if !self.connected {
                return Err(TransportError::ConnectionClosed);
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    trace!("Received {} byte frame", data.len());
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::from(text.into_bytes())));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Control channel closed by coordinator");
                    self.connected = false;
                    return Ok(None);
                }
                Some(Ok(msg)) => {
                    debug!("Ignoring WebSocket message type: {:?}", msg);
                }
                Some(Err(e)) => {
                    error!("Control channel error: {}", e);
                    self.connected = false;
                    return Err(TransportError::WebSocket(e.to_string()));
                }
                None => {
                    debug!("Control channel stream ended");
                    self.connected = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
