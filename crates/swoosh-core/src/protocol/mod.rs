//! Wire formats for discovery and encrypted application traffic.

pub mod discovery;
pub mod frame;

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The byte slice is longer than the format allows.
    #[error("oversized data: at most {max} bytes allowed, got {actual}")]
    Oversized { max: usize, actual: usize },

    /// A fixed-width field had the wrong length.
    #[error("invalid length: expected exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A field value is out of range or not valid for this format.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
