//! CBOR encoding for everything that crosses the wire or hits the journal.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Content type of CBOR request and response bodies.
pub const CBOR_CONTENT_TYPE: &str = "application/cbor";

/// Encodes a value as CBOR.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] if the bytes are not a valid encoding
/// of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// A protocol value with a CBOR form.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to CBOR.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

impl WireMessage for crate::entry::JournalEntry {}
impl WireMessage for crate::messages::PullRequest {}
impl WireMessage for crate::messages::PullResponse {}
