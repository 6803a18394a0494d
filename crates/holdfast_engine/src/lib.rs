//! # Holdfast Engine
//!
//! Offline-first sync engine for Holdfast.
//!
//! This crate provides:
//! - [`LocalStateStore`] - durable snapshot and emergency slots per entity
//! - [`EntityReplica`] - the locally owned state of one entity
//! - [`ReconciliationEngine`] - fetch, fold, commit, prune with retry
//! - [`SyncOrchestrator`] - periodic, debounced, and critical-path scheduling
//! - [`RemoteStore`] - the remote authoritative store abstraction
//!
//! ## Architecture
//!
//! Every mutation is applied to the local snapshot and persisted before the
//! call returns, then queued for the remote store:
//! 1. The write is tagged with a priority derived from its kind
//! 2. High-priority writes are reconciled immediately when online
//! 3. Other writes are batched until the debounce window goes quiet
//! 4. A periodic tick picks up anything left behind
//!
//! A pass fetches the remote snapshot, folds the queued writes over it,
//! commits the result, and rebases the local snapshot onto what was
//! committed.
//!
//! ## Key Invariants
//!
//! - Reads always reflect every local mutation
//! - A write leaves the queue only after the commit containing it succeeds
//! - At most one pass runs per entity at a time
//! - Replaying the queue onto the last synced snapshot reproduces the local
//!   snapshot

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod orchestrator;
mod reconcile;
mod remote;
mod replica;
mod state;
mod store;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use orchestrator::SyncOrchestrator;
pub use reconcile::{ReconcileReport, ReconciliationEngine, LAST_CRITICAL_SYNC_FIELD};
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore};
pub use replica::{repair_record, EntityReplica};
pub use state::{PassOutcome, SkipReason, SyncState, SyncStats, SyncStatus};
pub use store::LocalStateStore;
