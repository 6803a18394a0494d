//! In-memory replica of one entity backed by the local state store.

use crate::error::SyncResult;
use crate::store::LocalStateStore;
use holdfast_protocol::{
    merge, now_millis, EmergencyRecord, EntityId, EntityRecord, MutationKind, PendingWrite,
    PendingWriteLog, Priority, StateSnapshot, SyncMeta, Value, WriteId,
};
use holdfast_storage::SlotBackend;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The locally owned state of one entity.
///
/// Mutations are applied to the in-memory record and persisted before the
/// call returns. If persistence fails the replica keeps running in
/// *degraded* mode: the write stays queued in memory, an emergency record
/// is written, and persistence is retried on the next mutation or commit.
///
/// The lock is never held across an `.await`.
pub struct EntityReplica<B: SlotBackend> {
    entity_id: EntityId,
    store: Arc<LocalStateStore<B>>,
    inner: Mutex<ReplicaState>,
}

struct ReplicaState {
    record: EntityRecord,
    degraded: bool,
}

impl<B: SlotBackend> EntityReplica<B> {
    /// Loads an entity, seeding it with `seed` on first access.
    ///
    /// A pending-write queue that fails validation is rebuilt and the
    /// snapshot re-derived from the last synced baseline.
    ///
    /// # Errors
    ///
    /// Fails if the primary record exists but cannot be read or decoded.
    /// Failing to persist a new or repaired record only degrades the
    /// replica.
    pub fn open(
        store: Arc<LocalStateStore<B>>,
        entity_id: EntityId,
        seed: StateSnapshot,
    ) -> SyncResult<Self> {
        let (record, dirty) = match store.load(&entity_id)? {
            Some(mut record) => {
                let repaired = repair_record(&mut record);
                if let Some(reason) = &repaired {
                    error!(entity = %entity_id, %reason, "pending-write queue corrupted; rebuilt");
                }
                (record, repaired.is_some())
            }
            None => {
                debug!(entity = %entity_id, "seeding new entity");
                (EntityRecord::seeded(entity_id.clone(), seed), true)
            }
        };

        let mut state = ReplicaState {
            record,
            degraded: false,
        };
        if dirty {
            if let Err(err) = store.save(&state.record) {
                warn!(entity = %entity_id, error = %err, "failed to persist entity record; running degraded");
                state.degraded = true;
            }
        }

        match store.load_emergency(&entity_id) {
            Ok(Some(backup)) => warn!(
                entity = %entity_id,
                write = %backup.write.id,
                reason = %backup.reason,
                "emergency backup present; recoverable data loss"
            ),
            Ok(None) => {}
            Err(err) => warn!(entity = %entity_id, error = %err, "unreadable emergency backup"),
        }

        Ok(Self {
            entity_id,
            store,
            inner: Mutex::new(state),
        })
    }

    /// Returns the entity id.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<LocalStateStore<B>> {
        &self.store
    }

    /// Returns the current local snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().record.snapshot.clone()
    }

    /// Returns a copy of the sync metadata.
    pub fn meta(&self) -> SyncMeta {
        self.inner.lock().record.meta.clone()
    }

    /// Returns all pending writes in queue order.
    pub fn pending(&self) -> Vec<PendingWrite> {
        self.inner.lock().record.meta.pending_writes.list_all().to_vec()
    }

    /// Returns the number of pending writes.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().record.meta.pending_writes.len()
    }

    /// Returns the pending writes of one priority.
    pub fn pending_with(&self, priority: Priority) -> Vec<PendingWrite> {
        self.inner.lock().record.meta.pending_writes.by_priority(priority)
    }

    /// Returns pending medium and low priority writes.
    pub fn pending_non_critical(&self) -> Vec<PendingWrite> {
        self.inner.lock().record.meta.pending_writes.non_critical()
    }

    /// Returns true if the last persistence attempt failed.
    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded
    }

    /// Applies a mutation locally and queues it for sync.
    ///
    /// Never fails: if the record cannot be persisted the write stays
    /// queued in memory and an emergency backup is attempted.
    pub fn record_mutation(&self, kind: MutationKind, payload: Value) -> PendingWrite {
        let mut state = self.inner.lock();
        let id = state.record.meta.allocate_write_id();
        let write = PendingWrite::new(id, kind, payload, now_millis());

        merge::apply_in_place(&mut state.record.snapshot, &write.kind, &write.payload);
        state.record.meta.pending_writes.enqueue(write.clone());
        debug!(
            entity = %self.entity_id,
            write = %write.id,
            kind = %write.kind,
            priority = %write.priority,
            "mutation recorded"
        );

        if let Err(err) = self.persist_locked(&mut state) {
            let backup = EmergencyRecord {
                entity_id: self.entity_id.clone(),
                write: write.clone(),
                snapshot: state.record.snapshot.clone(),
                recorded_at: now_millis(),
                reason: err.to_string(),
            };
            match self.store.save_emergency(&backup) {
                Ok(()) => warn!(
                    entity = %self.entity_id,
                    write = %write.id,
                    "primary write failed; mutation saved to emergency slot (recoverable data loss)"
                ),
                Err(backup_err) => error!(
                    entity = %self.entity_id,
                    write = %write.id,
                    error = %backup_err,
                    "primary and emergency writes failed; mutation held in memory only"
                ),
            }
        }
        write
    }

    /// Reads the durably persisted snapshot, bypassing the in-memory copy.
    pub fn durable_snapshot(&self) -> SyncResult<Option<StateSnapshot>> {
        self.store.get(&self.entity_id)
    }

    /// Returns the local snapshot a pass reconciles from.
    ///
    /// While degraded the in-memory snapshot is used, since it holds
    /// mutations that never reached the primary slot. Otherwise the durable
    /// snapshot is read back; `None` means the primary record is gone.
    pub fn sync_base(&self) -> SyncResult<Option<StateSnapshot>> {
        {
            let state = self.inner.lock();
            if state.degraded {
                return Ok(Some(state.record.snapshot.clone()));
            }
        }
        self.durable_snapshot()
    }

    /// Returns the writes to commit for `batch`, in creation order.
    ///
    /// Members of `batch` that are no longer queued are dropped. Earlier
    /// queued writes that touch the same fields are added, so the commit
    /// agrees with the order the local snapshot applied them in.
    pub fn commit_set(&self, batch: &[PendingWrite]) -> Vec<PendingWrite> {
        let state = self.inner.lock();
        let log = &state.record.meta.pending_writes;
        let queued: Vec<PendingWrite> = batch
            .iter()
            .filter(|w| log.contains(w.id))
            .cloned()
            .collect();
        if queued.is_empty() {
            return queued;
        }
        log.commit_set(&queued)
    }

    /// Records a successful remote commit.
    ///
    /// Removes exactly `ids` from the queue, advances the baseline to
    /// `committed`, and rebases the local snapshot onto it by replaying the
    /// remaining writes in creation order. Returns the number of writes
    /// removed.
    pub fn apply_commit(&self, ids: &[WriteId], committed: StateSnapshot, at: u64) -> usize {
        let mut state = self.inner.lock();
        let removed = state.record.meta.pending_writes.remove_by_ids(ids);
        state.record.meta.last_synced = Some(committed);
        state.record.meta.last_sync_timestamp = Some(at);
        if let Some(rebased) = state.record.meta.replay() {
            state.record.snapshot = rebased;
        }
        if let Err(err) = self.persist_locked(&mut state) {
            let committed: Vec<u64> = ids.iter().map(|id| id.get()).collect();
            error!(
                entity = %self.entity_id,
                ?committed,
                error = %err,
                "remote commit recorded in memory only; these writes would be resent after a restart"
            );
        }
        removed
    }

    /// Retries persistence if the replica is degraded. Returns true if the
    /// replica is healthy afterwards.
    pub fn flush_if_degraded(&self) -> bool {
        let mut state = self.inner.lock();
        if !state.degraded {
            return true;
        }
        self.persist_locked(&mut state).is_ok()
    }

    /// Returns the emergency backup, if one exists.
    pub fn emergency_backup(&self) -> SyncResult<Option<EmergencyRecord>> {
        self.store.load_emergency(&self.entity_id)
    }

    /// Deletes the emergency backup. Returns true if one existed.
    pub fn clear_emergency(&self) -> SyncResult<bool> {
        self.store.clear_emergency(&self.entity_id)
    }

    fn persist_locked(&self, state: &mut ReplicaState) -> SyncResult<()> {
        match self.store.save(&state.record) {
            Ok(()) => {
                if state.degraded {
                    info!(entity = %self.entity_id, "local persistence recovered");
                    state.degraded = false;
                }
                Ok(())
            }
            Err(err) => {
                warn!(entity = %self.entity_id, error = %err, "local persistence failed; running degraded");
                state.degraded = true;
                Err(err)
            }
        }
    }
}

/// Rebuilds a damaged pending-write queue in place.
///
/// Priorities are re-derived from each write's kind, the queue is sorted
/// and de-duplicated, the id counter is raised above every queued id, and
/// the snapshot is re-derived from the baseline when one exists. Returns
/// the validation failure that triggered the rebuild, or `None` if the
/// queue was already valid.
pub fn repair_record(record: &mut EntityRecord) -> Option<String> {
    let reason = match record.meta.pending_writes.validate() {
        Ok(()) => return None,
        Err(err) => err.to_string(),
    };

    let writes = record.meta.pending_writes.list_all().iter().cloned().map(|mut w| {
        w.priority = w.kind.priority();
        w
    });
    record.meta.pending_writes = PendingWriteLog::rebuilt(writes.collect::<Vec<_>>());
    record.meta.repair_id_counter();
    if let Some(replayed) = record.meta.replay() {
        record.snapshot = replayed;
    }
    Some(reason)
}
