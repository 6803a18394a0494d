//! Slot backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A keyed, durable blob store.
///
/// Each slot holds exactly one record. Writing a slot replaces the previous
/// record as a whole; readers observe either the old or the new record,
/// never a mix of both.
///
/// # Invariants
///
/// - `write_slot` is durable when it returns `Ok`
/// - `read_slot` returns exactly the bytes of the last successful write
/// - A failed `write_slot` leaves the previous record intact
/// - Backends must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait SlotBackend: Send + Sync {
    /// Reads the record stored under `key`.
    ///
    /// Returns `Ok(None)` if the slot has never been written or was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read_slot(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the record could not be
    /// made durable. The previous record is left untouched in that case.
    fn write_slot(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the record stored under `key`.
    ///
    /// Returns `true` if a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove_slot(&self, key: &str) -> StorageResult<bool>;

    /// Lists the keys of all stored slots, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be produced.
    fn list_slots(&self) -> StorageResult<Vec<String>>;
}

/// Checks that `key` is usable as a slot name on every backend.
///
/// Keys are non-empty, at most 200 bytes, made of ASCII alphanumerics,
/// `-`, `_` and `.`, and do not start with `.`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_slot_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
