//! Repair command implementation.

use super::{open_store, parse_entity};
use holdfast_engine::repair_record;
use std::path::Path;
use tracing::info;

/// Runs the repair command.
pub fn run(path: &Path, entity: &str, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let id = parse_entity(entity)?;
    let mut record = store
        .load(&id)?
        .ok_or_else(|| format!("No local state for entity {}", id))?;

    let before = record.meta.pending_writes.len();
    let Some(reason) = repair_record(&mut record) else {
        println!("Queue for {} is valid; nothing to repair", id);
        return Ok(());
    };
    let after = record.meta.pending_writes.len();

    println!("Queue for {} is damaged: {}", id, reason);
    println!("  Writes before:  {}", before);
    println!("  Writes after:   {}", after);
    println!("  Next write id:  {}", record.meta.next_write_id);

    if dry_run {
        println!();
        println!("Dry run - no changes written");
        return Ok(());
    }

    store.save(&record)?;
    info!(entity = %id, dropped = before - after, "repaired pending-write queue");
    println!();
    println!("✓ Repaired queue written");
    Ok(())
}
