//! Transport boundary for the control channel

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A full-duplex frame transport to the coordinator.
///
/// Implementations carry whole message frames; framing, encryption and
/// handshake details stay behind this boundary.
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Receive the next frame; `None` means the peer closed cleanly
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the transport is still usable
    fn is_connected(&self) -> bool;
}
