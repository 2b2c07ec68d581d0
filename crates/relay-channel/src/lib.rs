//! Control Channel Adapter
//!
//! The boundary between the relay node and its coordinator: a
//! persistent, auto-reconnecting full-duplex messaging connection
//! identified by an endpoint URL.
//!
//! The [`Transport`] trait defines the framing boundary;
//! [`WebSocketTransport`] implements it over tokio-tungstenite.
//! [`ControlChannel`] owns the reconnection loop and exposes the
//! channel as a pair of message queues plus a connectivity flag.

pub mod channel;
pub mod transport;
pub mod websocket;

pub use channel::{ChannelConfig, ControlChannel};
pub use transport::{Transport, TransportError};
pub use websocket::WebSocketTransport;
