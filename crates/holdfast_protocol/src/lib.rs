//! # Holdfast Protocol
//!
//! State, mutation, and pending-write types for Holdfast.
//!
//! This crate provides:
//! - [`Value`] and [`StateSnapshot`] for per-entity state
//! - [`MutationKind`] with its merge strategy and sync priority
//! - [`PendingWrite`] and the priority-ordered [`PendingWriteLog`]
//! - The [`merge`] resolver that applies writes to snapshots
//! - CBOR records for the primary and emergency persistence slots
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - The pending-write log is always sorted by priority, then creation order
//! - Write ids are unique and never reused for an entity
//! - Merging is total and deterministic

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod log;
pub mod merge;
mod meta;
mod mutation;
mod record;
mod snapshot;
mod value;
mod write;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{EntityId, WriteId};
pub use log::PendingWriteLog;
pub use meta::SyncMeta;
pub use mutation::{MergeStrategy, MutationKind, Priority};
pub use record::{EmergencyRecord, EntityRecord, SCHEMA_VERSION};
pub use snapshot::StateSnapshot;
pub use value::Value;
pub use write::{now_millis, PendingWrite};
