//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON or does not match the payload shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload parsed but violates a structural rule.
    #[error("invalid payload: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
