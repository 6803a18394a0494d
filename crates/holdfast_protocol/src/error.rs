//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or encoding protocol types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a record.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Failed to decode a record.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// The entity id cannot be used.
    #[error("invalid entity id {0:?}")]
    InvalidEntityId(String),

    /// The pending-write ordering invariant does not hold.
    #[error("pending-write queue corrupted: {0}")]
    QueueCorruption(String),

    /// A record was written by a newer schema than this build understands.
    #[error("unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchema {
        /// Version found in the record.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },
}

impl ProtocolError {
    /// Creates a queue corruption error.
    pub fn queue_corruption(message: impl Into<String>) -> Self {
        Self::QueueCorruption(message.into())
    }
}
