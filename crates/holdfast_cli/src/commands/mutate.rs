//! Mutate command implementation.

use super::{open_store, parse_entity};
use holdfast_engine::EntityReplica;
use holdfast_protocol::{MutationKind, StateSnapshot, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the mutate command.
///
/// The write is applied and queued locally; the next sync pass sends it.
pub fn run(
    path: &Path,
    entity: &str,
    kind: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(open_store(path)?);
    let id = parse_entity(entity)?;
    if store.load(&id)?.is_none() {
        return Err(format!("No local state for entity {}", id).into());
    }

    let kind = MutationKind::from_tag(kind);
    let payload: Value = serde_json::from_str(payload)?;

    let replica = EntityReplica::open(store, id, StateSnapshot::new())?;
    let write = replica.record_mutation(kind, payload);
    if replica.is_degraded() {
        return Err("Mutation applied but could not be persisted; see the emergency slot".into());
    }

    info!(entity = %replica.entity_id(), write_id = %write.id, kind = %write.kind, "queued write");
    println!(
        "Queued write #{} ({}, {} priority); {} pending",
        write.id,
        write.kind,
        write.priority,
        replica.pending_len()
    );
    Ok(())
}
