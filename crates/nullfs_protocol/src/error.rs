//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// A decoded entry violates the entry rules.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}
