//! Pending write records.

use crate::ids::WriteId;
use crate::merge;
use crate::mutation::{MutationKind, Priority};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// One queued mutation that has not yet been committed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Unique, creation-ordered id.
    pub id: WriteId,
    /// What the mutation changes.
    pub kind: MutationKind,
    /// Partial state fragment.
    pub payload: Value,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Sync priority, derived from `kind` at creation.
    pub priority: Priority,
}

impl PendingWrite {
    /// Creates a write, deriving its priority from the kind.
    pub fn new(id: WriteId, kind: MutationKind, payload: Value, created_at: u64) -> Self {
        let priority = kind.priority();
        Self {
            id,
            kind,
            payload,
            created_at,
            priority,
        }
    }

    /// Returns the queue ordering key.
    pub fn queue_key(&self) -> (Priority, WriteId) {
        (self.priority, self.id)
    }

    /// Returns the top-level snapshot fields this write may change.
    pub fn touched_fields(&self) -> BTreeSet<String> {
        merge::touched_fields(&self.kind, &self.payload)
    }

    /// Returns true if this write takes the immediate sync path.
    pub fn is_critical(&self) -> bool {
        self.priority.is_critical()
    }
}
