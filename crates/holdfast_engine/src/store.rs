//! Local durable state store.

use crate::error::SyncResult;
use holdfast_protocol::{EmergencyRecord, EntityId, EntityRecord, StateSnapshot};
use holdfast_storage::SlotBackend;

const STATE_SUFFIX: &str = ".state";
const EMERGENCY_SUFFIX: &str = ".emergency";

/// Durable per-entity persistence on top of a [`SlotBackend`].
///
/// Each entity owns two slots:
/// - `<entity>.state` holds the [`EntityRecord`] (snapshot and sync
///   metadata, replaced together)
/// - `<entity>.emergency` holds an [`EmergencyRecord`] written only when
///   the primary slot cannot be written
pub struct LocalStateStore<B: SlotBackend> {
    backend: B,
}

impl<B: SlotBackend> LocalStateStore<B> {
    /// Creates a store over the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Loads the primary record of an entity.
    pub fn load(&self, entity_id: &EntityId) -> SyncResult<Option<EntityRecord>> {
        match self.backend.read_slot(&state_key(entity_id))? {
            Some(bytes) => Ok(Some(EntityRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Durably replaces the primary record of an entity.
    pub fn save(&self, record: &EntityRecord) -> SyncResult<()> {
        let bytes = record.encode()?;
        self.backend
            .write_slot(&state_key(&record.entity_id), &bytes)?;
        Ok(())
    }

    /// Returns the persisted snapshot of an entity.
    pub fn get(&self, entity_id: &EntityId) -> SyncResult<Option<StateSnapshot>> {
        Ok(self.load(entity_id)?.map(|record| record.snapshot))
    }

    /// Replaces the persisted snapshot, keeping the entity's sync metadata.
    ///
    /// An entity without a record is seeded with this snapshot.
    pub fn put(&self, entity_id: &EntityId, snapshot: StateSnapshot) -> SyncResult<()> {
        let record = match self.load(entity_id)? {
            Some(mut record) => {
                record.snapshot = snapshot;
                record
            }
            None => EntityRecord::seeded(entity_id.clone(), snapshot),
        };
        self.save(&record)
    }

    /// Writes the emergency slot of an entity.
    pub fn save_emergency(&self, record: &EmergencyRecord) -> SyncResult<()> {
        let bytes = record.encode()?;
        self.backend
            .write_slot(&emergency_key(&record.entity_id), &bytes)?;
        Ok(())
    }

    /// Reads the emergency slot of an entity.
    pub fn load_emergency(&self, entity_id: &EntityId) -> SyncResult<Option<EmergencyRecord>> {
        match self.backend.read_slot(&emergency_key(entity_id))? {
            Some(bytes) => Ok(Some(EmergencyRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes the emergency slot. Returns true if one existed.
    pub fn clear_emergency(&self, entity_id: &EntityId) -> SyncResult<bool> {
        Ok(self.backend.remove_slot(&emergency_key(entity_id))?)
    }

    /// Lists entities with a primary record, sorted.
    pub fn entities(&self) -> SyncResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .backend
            .list_slots()?
            .iter()
            .filter_map(|key| key.strip_suffix(STATE_SUFFIX))
            .filter_map(|name| EntityId::new(name).ok())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn state_key(entity_id: &EntityId) -> String {
    format!("{entity_id}{STATE_SUFFIX}")
}

fn emergency_key(entity_id: &EntityId) -> String {
    format!("{entity_id}{EMERGENCY_SUFFIX}")
}
