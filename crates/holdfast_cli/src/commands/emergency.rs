//! Emergency command implementation.

use super::{format_millis, open_store, parse_entity};
use std::path::Path;
use tracing::info;

/// Runs the emergency command.
pub fn run(
    path: &Path,
    entity: &str,
    clear: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let id = parse_entity(entity)?;

    if clear {
        if store.clear_emergency(&id)? {
            info!(entity = %id, "cleared emergency backup");
            println!("✓ Emergency backup for {} cleared", id);
        } else {
            println!("No emergency backup for {}", id);
        }
        return Ok(());
    }

    let backup = store.load_emergency(&id)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&backup)?);
        return Ok(());
    }

    let Some(backup) = backup else {
        println!("No emergency backup for {}", id);
        return Ok(());
    };

    println!("Emergency backup for {}", id);
    println!("========================================");
    println!("  Recorded:  {}", format_millis(Some(backup.recorded_at)));
    println!("  Reason:    {}", backup.reason);
    println!(
        "  Write:     #{} {} {}",
        backup.write.id,
        backup.write.kind,
        serde_json::to_string(&backup.write.payload)?
    );
    println!();
    println!("Snapshot:");
    for (field, value) in backup.snapshot.fields() {
        println!("  {}: {}", field, serde_json::to_string(value)?);
    }

    Ok(())
}
