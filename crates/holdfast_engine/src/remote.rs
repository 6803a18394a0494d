//! Remote authoritative store abstraction.

use async_trait::async_trait;
use holdfast_protocol::{EntityId, StateSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure or service unavailability; worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// The request was refused; retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError::Transient(message.into())
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        RemoteError::Permanent(message.into())
    }
}

/// The remote authoritative document store.
///
/// Each entity is one document. Implementations must make `commit` a single
/// atomic document write; the transport behind it is up to the
/// implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the current remote snapshot, or `None` if the entity has no
    /// document.
    async fn fetch(&self, entity_id: &EntityId) -> Result<Option<StateSnapshot>, RemoteError>;

    /// Replaces the remote snapshot.
    async fn commit(&self, entity_id: &EntityId, snapshot: &StateSnapshot)
        -> Result<(), RemoteError>;
}

/// An in-process remote store with scripted failures.
///
/// Used by tests and by the CLI's offline tooling.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<EntityId, StateSnapshot>>,
    fetch_failures: Mutex<VecDeque<RemoteError>>,
    commit_script: Mutex<VecDeque<Result<(), RemoteError>>>,
    commit_delay: Mutex<Option<Duration>>,
    history: Mutex<Vec<(EntityId, StateSnapshot)>>,
    fetch_count: AtomicU64,
    commit_count: AtomicU64,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document.
    pub fn insert(&self, entity_id: EntityId, snapshot: StateSnapshot) {
        self.documents.lock().insert(entity_id, snapshot);
    }

    /// Returns a copy of a document.
    pub fn get(&self, entity_id: &EntityId) -> Option<StateSnapshot> {
        self.documents.lock().get(entity_id).cloned()
    }

    /// Removes a document.
    pub fn remove(&self, entity_id: &EntityId) -> Option<StateSnapshot> {
        self.documents.lock().remove(entity_id)
    }

    /// Makes the next fetch calls fail with the given errors, in order.
    pub fn fail_next_fetches(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.fetch_failures.lock().extend(errors);
    }

    /// Makes the next commit calls fail with the given errors, in order.
    pub fn fail_next_commits(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.script_commits(errors.into_iter().map(Err));
    }

    /// Scripts the outcome of the next commit calls, in order. An `Ok`
    /// entry lets that commit through.
    pub fn script_commits(&self, outcomes: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.commit_script.lock().extend(outcomes);
    }

    /// Delays every commit by `delay` before it is applied.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *self.commit_delay.lock() = delay;
    }

    /// Number of fetch calls made, including failed ones.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of commit calls made, including failed ones.
    pub fn commit_count(&self) -> u64 {
        self.commit_count.load(Ordering::SeqCst)
    }

    /// Snapshots that were successfully committed, oldest first.
    pub fn committed(&self) -> Vec<(EntityId, StateSnapshot)> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, entity_id: &EntityId) -> Result<Option<StateSnapshot>, RemoteError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.get(entity_id))
    }

    async fn commit(
        &self,
        entity_id: &EntityId,
        snapshot: &StateSnapshot,
    ) -> Result<(), RemoteError> {
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.commit_script.lock().pop_front();
        if let Some(Err(err)) = scripted {
            return Err(err);
        }
        self.documents
            .lock()
            .insert(entity_id.clone(), snapshot.clone());
        self.history
            .lock()
            .push((entity_id.clone(), snapshot.clone()));
        Ok(())
    }
}
