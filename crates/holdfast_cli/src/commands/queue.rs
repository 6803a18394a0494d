//! Queue command implementation.

use super::{open_store, parse_entity};
use std::path::Path;

/// Runs the queue command.
pub fn run(path: &Path, entity: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let id = parse_entity(entity)?;
    let record = store
        .load(&id)?
        .ok_or_else(|| format!("No local state for entity {}", id))?;
    let writes = record.meta.pending_writes.list_all();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(writes)?);
        return Ok(());
    }

    println!("Pending writes for {} ({} queued)", id, writes.len());
    println!("========================================");
    for write in writes {
        println!(
            "[{:>6}] #{:<6} {:<24} at {} {}",
            write.priority.as_str(),
            write.id.get(),
            write.kind.tag(),
            write.created_at,
            serde_json::to_string(&write.payload)?
        );
    }

    Ok(())
}
