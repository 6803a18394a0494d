//! Error types for the sync engine.

use crate::remote::RemoteError;
use holdfast_protocol::{EntityId, ProtocolError};
use holdfast_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while persisting or reconciling entity state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local durable store failed.
    #[error("local persistence failed: {0}")]
    LocalPersistence(#[from] StorageError),

    /// The remote store is temporarily unreachable.
    #[error("remote store unavailable: {0}")]
    RemoteTransient(String),

    /// The remote store refused the request.
    #[error("remote store rejected request: {0}")]
    RemotePermanent(String),

    /// Transient failures persisted past the retry ceiling.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },

    /// The entity has no document in the remote store.
    #[error("entity {0} does not exist in the remote store")]
    RemoteEntityMissing(EntityId),

    /// The entity has no durable local record.
    #[error("no local state for entity {0}")]
    LocalStateMissing(EntityId),

    /// The pending-write ordering invariant was violated.
    #[error("pending-write queue corrupted: {0}")]
    QueueCorruption(String),

    /// A record was written by a newer schema.
    #[error("unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchema {
        /// Version found on disk.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteTransient(_))
    }

    /// Returns true if the entity cannot sync until repaired externally.
    pub fn halts_entity(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteEntityMissing(_)
                | SyncError::LocalStateMissing(_)
                | SyncError::UnsupportedSchema { .. }
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::QueueCorruption(message) => SyncError::QueueCorruption(message),
            ProtocolError::UnsupportedSchema { found, supported } => {
                SyncError::UnsupportedSchema { found, supported }
            }
            other => SyncError::Codec(other.to_string()),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transient(message) => SyncError::RemoteTransient(message),
            RemoteError::Permanent(message) => SyncError::RemotePermanent(message),
        }
    }
}
