//! Error types for the progress sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the data model.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Completion percentage outside 0..=100.
    #[error("invalid completion percentage: {0} (expected 0-100)")]
    InvalidPercentage(u8),

    /// Unknown conflict strategy name.
    #[error("unknown conflict strategy: {0}")]
    UnknownStrategy(String),

    /// Checkpoint encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
