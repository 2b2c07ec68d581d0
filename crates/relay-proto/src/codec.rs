//! JSON wire codec for control messages

use crate::messages::ControlMessage;
use bytes::Bytes;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(serde_json::Error),
}

/// Encodes and decodes control messages as JSON frames
pub struct ControlCodec;

impl ControlCodec {
    pub fn encode(message: &ControlMessage) -> Result<Bytes, CodecError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    pub fn decode(frame: &[u8]) -> Result<ControlMessage, CodecError> {
        serde_json::from_slice(frame).map_err(CodecError::Decode)
    }
}
