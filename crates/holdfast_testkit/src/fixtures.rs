//! Test fixtures for stores, remotes, and orchestrators.

use holdfast_engine::{
    LocalStateStore, MemoryRemoteStore, RetryConfig, SyncConfig, SyncOrchestrator,
};
use holdfast_protocol::{EntityId, StateSnapshot, Value};
use holdfast_storage::{FileBackend, InMemoryBackend, SlotBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// The entity used by most tests.
pub fn player_id() -> EntityId {
    EntityId::new("player-1").expect("valid entity id")
}

/// A freshly created character.
pub fn player_snapshot() -> StateSnapshot {
    StateSnapshot::from_fields([
        ("health", Value::from(100)),
        ("incapacitated", Value::from(false)),
        (
            "location",
            Value::map([("zone", Value::from("harbor")), ("x", Value::from(3)), ("y", Value::from(7))]),
        ),
        (
            "inventory",
            Value::map([("rope", Value::from(1)), ("torch", Value::from(2))]),
        ),
        (
            "stats",
            Value::map([("strength", Value::from(10)), ("agility", Value::from(8))]),
        ),
        ("action_points", Value::from(10)),
        ("movement_points", Value::from(20)),
        ("currency", Value::from(50)),
    ])
}

/// An in-memory local store.
pub fn memory_store() -> Arc<LocalStateStore<InMemoryBackend>> {
    Arc::new(LocalStateStore::new(InMemoryBackend::new()))
}

/// A file-backed local store in a temporary directory.
///
/// Keep the returned [`TempDir`] alive for as long as the store is used.
pub fn temp_file_store() -> (TempDir, Arc<LocalStateStore<FileBackend>>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let backend = FileBackend::open(dir.path()).expect("Failed to open file backend");
    (dir, Arc::new(LocalStateStore::new(backend)))
}

/// A remote store holding one document.
pub fn seeded_remote(entity_id: &EntityId, snapshot: StateSnapshot) -> Arc<MemoryRemoteStore> {
    let remote = MemoryRemoteStore::new();
    remote.insert(entity_id.clone(), snapshot);
    Arc::new(remote)
}

/// A connectivity channel starting in the given state.
pub fn connectivity(online: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(online)
}

/// A configuration with short retry delays and a long tick, so tests
/// control when passes run.
pub fn quick_config() -> SyncConfig {
    SyncConfig::new()
        .with_tick_interval(Duration::from_secs(3600))
        .with_debounce_window(Duration::from_secs(2))
        .with_failure_cooldown(Duration::from_secs(5))
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(100)))
}

/// Starts an orchestrator for [`player_id`] seeded with [`player_snapshot`].
pub fn start_orchestrator<B: SlotBackend + 'static>(
    store: Arc<LocalStateStore<B>>,
    remote: Arc<MemoryRemoteStore>,
    connectivity: watch::Receiver<bool>,
    config: SyncConfig,
) -> SyncOrchestrator<MemoryRemoteStore, B> {
    SyncOrchestrator::start(
        store,
        player_id(),
        player_snapshot(),
        remote,
        connectivity,
        config,
    )
    .expect("Failed to start orchestrator")
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
///
/// Works with paused tokio time, where the sleeps advance the clock.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
