//! Relay Protocol Definitions
//!
//! This crate defines the control-channel messages exchanged between an
//! edge relay node and its coordinator, along with the payload encoding
//! and the wire codec.

pub mod codec;
pub mod messages;
pub mod payload;

pub use codec::{CodecError, ControlCodec};
pub use messages::ControlMessage;
pub use payload::{Payload, PayloadError};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Handshake header carrying the node's identity (its host name)
pub const NODE_NAME_HEADER: &str = "server-name";
