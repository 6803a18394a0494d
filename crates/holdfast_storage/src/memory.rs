//! In-memory slot backend for testing.

use crate::backend::{validate_slot_key, SlotBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory slot backend.
///
/// This backend keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// Writes can be made to fail on demand to exercise degraded-persistence
/// paths (see [`InMemoryBackend::fail_writes_with_suffix`]).
///
/// # Example
///
/// ```rust
/// use holdfast_storage::{InMemoryBackend, SlotBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.fail_writes_with_suffix(".state");
/// assert!(backend.write_slot("p1.state", b"x").is_err());
/// assert!(backend.write_slot("p1.emergency", b"x").is_ok());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    slots: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_suffix: RwLock<Option<String>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing records.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_slots(slots: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            slots: RwLock::new(slots.into_iter().collect()),
            failing_suffix: RwLock::new(None),
        }
    }

    /// Returns a copy of all records.
    #[must_use]
    pub fn slots(&self) -> BTreeMap<String, Vec<u8>> {
        self.slots.read().clone()
    }

    /// Makes every write to a key ending in `suffix` fail.
    ///
    /// An empty suffix fails all writes.
    pub fn fail_writes_with_suffix(&self, suffix: impl Into<String>) {
        *self.failing_suffix.write() = Some(suffix.into());
    }

    /// Makes every write fail.
    pub fn fail_all_writes(&self) {
        self.fail_writes_with_suffix("");
    }

    /// Stops injecting write failures.
    pub fn heal(&self) {
        *self.failing_suffix.write() = None;
    }

    /// Removes all records.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

impl SlotBackend for InMemoryBackend {
    fn read_slot(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_slot_key(key)?;
        Ok(self.slots.read().get(key).cloned())
    }

    fn write_slot(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_slot_key(key)?;

        if let Some(suffix) = self.failing_suffix.read().as_deref() {
            if key.ends_with(suffix) {
                return Err(StorageError::WriteRejected {
                    key: key.to_string(),
                    reason: "injected failure".into(),
                });
            }
        }

        self.slots.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove_slot(&self, key: &str) -> StorageResult<bool> {
        validate_slot_key(key)?;
        Ok(self.slots.write().remove(key).is_some())
    }

    fn list_slots(&self) -> StorageResult<Vec<String>> {
        Ok(self.slots.read().keys().cloned().collect())
    }
}
