//! Persisted records for the primary and emergency slots.
//!
//! Both records are CBOR documents. The primary record carries the
//! snapshot and its [`SyncMeta`] so that the two are always replaced
//! together.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::EntityId;
use crate::meta::SyncMeta;
use crate::snapshot::StateSnapshot;
use crate::write::PendingWrite;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Highest record schema version this build reads and the version it
/// writes.
pub const SCHEMA_VERSION: u32 = 1;

/// The primary persisted record of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity this record belongs to.
    pub entity_id: EntityId,
    /// Current local snapshot.
    pub snapshot: StateSnapshot,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl EntityRecord {
    /// Creates a record for a freshly seeded entity.
    pub fn seeded(entity_id: EntityId, snapshot: StateSnapshot) -> Self {
        Self {
            entity_id,
            snapshot,
            meta: SyncMeta::new(SCHEMA_VERSION),
        }
    }

    /// Encodes the record to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes a record, upgrading older schema versions.
    ///
    /// The pending-write queue is *not* validated here; callers decide how
    /// to recover from a damaged queue.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedSchema`] for records written by a
    /// newer schema, or [`ProtocolError::Decoding`] for malformed bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut record: Self = decode_cbor(bytes)?;
        if record.meta.schema_version > SCHEMA_VERSION {
            return Err(ProtocolError::UnsupportedSchema {
                found: record.meta.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        record.meta.schema_version = SCHEMA_VERSION;
        Ok(record)
    }
}

/// Last-resort backup written when the primary record cannot be persisted.
///
/// It holds the mutation that could not be saved and the snapshot it
/// produced. It is never merged back automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    /// Entity this backup belongs to.
    pub entity_id: EntityId,
    /// The mutation whose primary write failed.
    pub write: PendingWrite,
    /// Local snapshot after applying the mutation.
    pub snapshot: StateSnapshot,
    /// When the backup was taken (millis since epoch).
    pub recorded_at: u64,
    /// Why the primary write failed.
    pub reason: String,
}

impl EmergencyRecord {
    /// Encodes the record to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes a record from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WriteId;
    use crate::mutation::MutationKind;
    use crate::value::Value;

    fn entity() -> EntityId {
        EntityId::new("player-1").unwrap()
    }

    #[test]
    fn primary_record_survives_cbor() {
        let mut record = EntityRecord::seeded(
            entity(),
            StateSnapshot::from_fields([("health", Value::from(100))]),
        );
        let id = record.meta.allocate_write_id();
        record.meta.pending_writes.enqueue(PendingWrite::new(
            id,
            MutationKind::UpdateHealth,
            Value::from(40),
            123,
        ));
        record.meta.last_synced = Some(StateSnapshot::new());

        let decoded = EntityRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut record = EntityRecord::seeded(entity(), StateSnapshot::new());
        record.meta.schema_version = SCHEMA_VERSION + 1;

        let result = EntityRecord::decode(&record.encode().unwrap());
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedSchema { found, .. }) if found == SCHEMA_VERSION + 1
        ));
    }

    #[test]
    fn older_schema_is_upgraded() {
        let mut record = EntityRecord::seeded(entity(), StateSnapshot::new());
        record.meta.schema_version = 0;

        let decoded = EntityRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.meta.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = EntityRecord::decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decoding(_))));
    }

    #[test]
    fn emergency_record_survives_cbor() {
        let record = EmergencyRecord {
            entity_id: entity(),
            write: PendingWrite::new(WriteId::new(9), MutationKind::UpdateHealth, Value::from(1), 5),
            snapshot: StateSnapshot::from_fields([("health", Value::from(1))]),
            recorded_at: 6,
            reason: "disk full".into(),
        };
        let decoded = EmergencyRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }
}
