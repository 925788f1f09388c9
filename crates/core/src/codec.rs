//! JSON codec between event envelopes and transport payloads.
//!
//! Payloads are JSON objects with named fields, so consumers can assert on
//! individual keys without depending on field order.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for envelope (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The event could not be serialized.
    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not valid JSON for the requested event shape.
    #[error("Failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize an event into a transport payload.
pub fn encode<T: Serialize + ?Sized>(event: &T) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Parse a transport payload into the requested event shape.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    serde_json::from_str(payload).map_err(CodecError::Decode)
}
