//! # Holdfast Storage
//!
//! Durable slot storage for Holdfast.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! local state store. Backends are **opaque keyed byte stores** - they do not
//! interpret the records they hold.
//!
//! ## Design Principles
//!
//! - A slot is a named blob that is replaced atomically as a whole
//! - `write_slot` is durable once it returns
//! - No knowledge of snapshots, pending writes, or encodings
//! - Must be `Send + Sync` so one backend can serve a session
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral sessions
//! - [`FileBackend`] - One file per slot in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use holdfast_storage::{InMemoryBackend, SlotBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write_slot("player-1.state", b"hello").unwrap();
//! let data = backend.read_slot("player-1.state").unwrap();
//! assert_eq!(data.as_deref(), Some(&b"hello"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_slot_key, SlotBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
