//! Inspect command implementation.

use super::{format_millis, open_store, parse_entity};
use holdfast_protocol::{EntityRecord, StateSnapshot};
use serde::Serialize;
use std::path::Path;

/// Summary of one entity's local record.
#[derive(Debug, Serialize)]
pub struct EntityInfo {
    /// Entity id.
    pub entity_id: String,
    /// Record schema version.
    pub schema_version: u32,
    /// Number of queued writes.
    pub pending_writes: usize,
    /// Id the next write will get.
    pub next_write_id: u64,
    /// Time of the last successful sync, in milliseconds.
    pub last_sync_timestamp: Option<u64>,
    /// Whether a last-synced baseline is stored.
    pub has_baseline: bool,
    /// Whether an emergency backup is present.
    pub has_emergency_backup: bool,
    /// The local snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StateSnapshot>,
}

impl EntityInfo {
    fn from_record(record: EntityRecord, has_emergency_backup: bool, with_snapshot: bool) -> Self {
        Self {
            entity_id: record.entity_id.to_string(),
            schema_version: record.meta.schema_version,
            pending_writes: record.meta.pending_writes.len(),
            next_write_id: record.meta.next_write_id,
            last_sync_timestamp: record.meta.last_sync_timestamp,
            has_baseline: record.meta.last_synced.is_some(),
            has_emergency_backup,
            snapshot: with_snapshot.then_some(record.snapshot),
        }
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    entity: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    let ids = match entity {
        Some(raw) => vec![parse_entity(raw)?],
        None => store.entities()?,
    };

    let mut infos = Vec::with_capacity(ids.len());
    for id in &ids {
        let record = store
            .load(id)?
            .ok_or_else(|| format!("No local state for entity {}", id))?;
        let has_backup = store.load_emergency(id)?.is_some();
        infos.push(EntityInfo::from_record(record, has_backup, entity.is_some()));
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Holdfast State: {:?}", path);
    println!("========================================");
    if infos.is_empty() {
        println!("No entities stored");
    }
    for info in &infos {
        println!();
        println!("Entity: {}", info.entity_id);
        println!("  Schema version:   {}", info.schema_version);
        println!("  Pending writes:   {}", info.pending_writes);
        println!("  Next write id:    {}", info.next_write_id);
        println!("  Last sync:        {}", format_millis(info.last_sync_timestamp));
        println!("  Baseline stored:  {}", info.has_baseline);
        println!("  Emergency backup: {}", info.has_emergency_backup);
        if let Some(snapshot) = &info.snapshot {
            println!();
            println!("Snapshot:");
            for (field, value) in snapshot.fields() {
                println!("  {}: {}", field, serde_json::to_string(value)?);
            }
        }
    }

    Ok(())
}
