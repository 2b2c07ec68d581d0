//! Control-channel message types
//!
//! Messages are tagged by event name and carry their fields in a `data`
//! object, e.g. `{"event":"client-data","data":{"correlationId":"a1","chunk":"..."}}`.

use crate::payload::Payload;
use serde::{Deserialize, Serialize};

/// One message on the control channel, in either direction.
///
/// The coordinator drives the node with `CreateConnection` (tunneled
/// establishment, acked before data flows), `Request` (immediate
/// establishment carrying its own first bytes) and `ClientData`; the
/// node answers with `Connected`, `ServerData` and `ConnectionError`.
/// `Heartbeat`/`HeartbeatAck` measure control-channel round-trip time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Tunneled connection request: connect, ack, then relay.
    /// Used when the coordinator drives the initial handshake bytes
    /// itself (opaque/encrypted streams). Family is pinned to IPv6.
    #[serde(rename_all = "camelCase")]
    CreateConnection {
        correlation_id: String,
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
    },

    /// Immediate connection request: connect, write the initial payload,
    /// then relay. No ack step.
    #[serde(rename_all = "camelCase")]
    Request {
        correlation_id: String,
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_payload: Option<Payload>,
    },

    /// Coordinator-side bytes for an established stream
    #[serde(rename_all = "camelCase")]
    ClientData {
        correlation_id: String,
        chunk: Payload,
    },

    /// Acknowledgement that a tunneled connection is open
    #[serde(rename_all = "camelCase")]
    Connected { correlation_id: String },

    /// Remote-side bytes for an established stream
    #[serde(rename_all = "camelCase")]
    ServerData {
        correlation_id: String,
        chunk: Payload,
    },

    /// A failure scoped to one stream, attributable by correlation id
    #[serde(rename_all = "camelCase")]
    ConnectionError {
        correlation_id: String,
        error: String,
    },

    /// Liveness probe carrying the sender's timestamp (unix millis)
    Heartbeat { time: u64 },

    /// Echo of a heartbeat, carrying the original timestamp
    HeartbeatAck { time: u64 },
}

impl ControlMessage {
    /// The correlation id this message is scoped to, if any
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            ControlMessage::CreateConnection { correlation_id, .. }
            | ControlMessage::Request { correlation_id, .. }
            | ControlMessage::ClientData { correlation_id, .. }
            | ControlMessage::Connected { correlation_id }
            | ControlMessage::ServerData { correlation_id, .. }
            | ControlMessage::ConnectionError { correlation_id, .. } => Some(correlation_id),
            ControlMessage::Heartbeat { .. } | ControlMessage::HeartbeatAck { .. } => None,
        }
    }
}
