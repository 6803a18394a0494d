//! # Holdfast Testkit
//!
//! Test utilities for Holdfast.
//!
//! This crate provides:
//! - Property-based test generators using proptest
//! - Fixtures for stores, replicas, remotes, and orchestrators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use holdfast_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn syncs_health() {
//!     let remote = seeded_remote(&player_id(), player_snapshot());
//!     let (online, connectivity) = connectivity(true);
//!     let orchestrator = start_orchestrator(memory_store(), Arc::clone(&remote), connectivity, quick_config());
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
