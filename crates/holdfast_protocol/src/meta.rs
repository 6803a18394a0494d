//! Sync metadata persisted alongside the snapshot.

use crate::ids::WriteId;
use crate::log::PendingWriteLog;
use crate::merge;
use crate::snapshot::StateSnapshot;
use serde::{Deserialize, Serialize};

/// Sync bookkeeping for one entity.
///
/// # Invariants
///
/// - `pending_writes` holds the ordering invariant of [`PendingWriteLog`]
/// - Replaying `pending_writes` in creation order onto `last_synced`
///   reproduces the local snapshot
/// - `next_write_id` is greater than every id ever allocated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Time of the last successful remote commit (millis since epoch).
    pub last_sync_timestamp: Option<u64>,
    /// Schema version of the record this meta was loaded from.
    pub schema_version: u32,
    /// Next id to hand out.
    pub next_write_id: u64,
    /// Writes awaiting remote commit.
    pub pending_writes: PendingWriteLog,
    /// Last snapshot known to be committed remotely.
    pub last_synced: Option<StateSnapshot>,
}

impl SyncMeta {
    /// Creates metadata for a freshly seeded entity.
    pub fn new(schema_version: u32) -> Self {
        Self {
            last_sync_timestamp: None,
            schema_version,
            next_write_id: 1,
            pending_writes: PendingWriteLog::new(),
            last_synced: None,
        }
    }

    /// Hands out the next write id.
    pub fn allocate_write_id(&mut self) -> WriteId {
        let id = WriteId::new(self.next_write_id);
        self.next_write_id += 1;
        id
    }

    /// Re-derives the local snapshot from the baseline and the queued
    /// writes, in creation order.
    ///
    /// Returns `None` if no baseline is known yet.
    pub fn replay(&self) -> Option<StateSnapshot> {
        let baseline = self.last_synced.as_ref()?;
        Some(merge::fold(
            baseline,
            self.pending_writes.in_creation_order(),
        ))
    }

    /// Raises `next_write_id` above every queued id.
    ///
    /// Used after rebuilding a damaged queue.
    pub fn repair_id_counter(&mut self) {
        if let Some(max) = self.pending_writes.max_id() {
            self.next_write_id = self.next_write_id.max(max.get() + 1);
        }
    }
}
