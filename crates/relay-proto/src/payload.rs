//! Byte-chunk encoding for the JSON control channel
//!
//! Raw stream bytes travel inside JSON messages as base64 strings. The
//! `Payload` newtype keeps the encoding explicit: decoding happens at
//! the point of use so that a malformed chunk can be reported per
//! correlation id instead of failing the whole message parse.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error produced when a payload cannot be interpreted as bytes
#[derive(Debug, Error)]
#[error("payload is not valid base64: {0}")]
pub struct PayloadError(#[from] base64::DecodeError);

/// A base64-encoded byte chunk as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    /// Encode raw bytes for transmission
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Decode the carried bytes
    pub fn decode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::from(STANDARD.decode(&self.0)?))
    }

    /// Length of the encoded form, for logging
    pub fn encoded_len(&self) -> usize {
        self.0.len()
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(&bytes)
    }
}
