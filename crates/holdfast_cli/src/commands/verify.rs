//! Verify command implementation.

use super::{open_store, parse_entity};
use holdfast_protocol::EntityRecord;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of records with no problems.
    pub valid_records: usize,
    /// Problems found, prefixed with the entity id.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks one record's queue ordering, id counter, and replay invariant.
pub fn verify_record(record: &EntityRecord) -> Vec<String> {
    let mut problems = Vec::new();
    let meta = &record.meta;

    if let Err(err) = meta.pending_writes.validate() {
        problems.push(err.to_string());
    }

    if let Some(max) = meta.pending_writes.max_id() {
        if meta.next_write_id <= max.get() {
            problems.push(format!(
                "next write id {} does not exceed queued id {}",
                meta.next_write_id, max
            ));
        }
    }

    if let Some(replayed) = meta.replay() {
        if replayed != record.snapshot {
            problems.push("replaying the queue onto the baseline does not reproduce the snapshot".to_string());
        }
    }

    problems
}

/// Runs the verify command.
pub fn run(path: &Path, entity: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying local state at {:?}", path);
    println!();

    let store = open_store(path)?;
    let ids = match entity {
        Some(raw) => vec![parse_entity(raw)?],
        None => store.entities()?,
    };

    let mut result = VerifyResult::default();
    for id in &ids {
        result.records_checked += 1;
        let problems = match store.load(id) {
            Ok(Some(record)) => verify_record(&record),
            Ok(None) => vec!["no local record".to_string()],
            Err(err) => vec![err.to_string()],
        };
        if problems.is_empty() {
            result.valid_records += 1;
        }
        result
            .errors
            .extend(problems.into_iter().map(|p| format!("{}: {}", id, p)));
    }

    println!("  Records checked: {}", result.records_checked);
    println!("  Valid records:   {}", result.valid_records);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {}", error);
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}
