//! CLI command implementations.

pub mod emergency;
pub mod inspect;
pub mod mutate;
pub mod queue;
pub mod repair;
pub mod verify;

use holdfast_engine::LocalStateStore;
use holdfast_protocol::EntityId;
use holdfast_storage::FileBackend;
use std::path::Path;

/// Opens the local store at `path`, which must already exist.
pub(crate) fn open_store(
    path: &Path,
) -> Result<LocalStateStore<FileBackend>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("State directory not found: {:?}", path).into());
    }
    Ok(LocalStateStore::new(FileBackend::open(path)?))
}

/// Parses an entity id argument.
pub(crate) fn parse_entity(raw: &str) -> Result<EntityId, Box<dyn std::error::Error>> {
    Ok(EntityId::new(raw)?)
}

/// Formats a millisecond timestamp, or `never`.
pub(crate) fn format_millis(millis: Option<u64>) -> String {
    match millis {
        Some(ms) => format!("{} ms since epoch", ms),
        None => "never".to_string(),
    }
}
