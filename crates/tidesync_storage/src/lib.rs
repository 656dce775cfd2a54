//! # Tidesync Storage
//!
//! Durable offline store for tidesync.
//!
//! This crate provides the persistence layer for the offline sync engine.
//! It exposes three logical collections behind a single backend trait:
//!
//! - **queue** - mutating requests that failed and await redelivery
//! - **form snapshots** - in-progress form input, keyed by form id
//! - **key/value** - small miscellaneous client state
//!
//! ## Backends
//!
//! - [`SqliteBackend`] - the preferred transactional backend
//! - [`FlatBackend`] - JSON-blob-per-collection fallback for hosts where
//!   SQLite cannot initialize
//! - [`MemoryBackend`] - for testing and ephemeral stores
//!
//! Backend selection happens once, in [`DurableStore::open`]: SQLite is
//! tried first and a failure to initialize silently downgrades to the flat
//! backend (logged, not surfaced to callers). The choice is sticky for the
//! process lifetime.
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{DurableStore, Method, NewQueueEntry};
//!
//! let store = DurableStore::in_memory();
//! let id = store
//!     .queue_add(NewQueueEntry::new("/logs", Method::Post))
//!     .unwrap();
//! assert_eq!(store.queue_count().unwrap(), 1);
//! store.queue_remove(id).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod entry;
mod error;
mod flat;
mod memory;
mod sqlite;
mod store;

pub use backend::StoreBackend;
pub use entry::{FormSnapshot, Method, NewQueueEntry, QueueEntry, UnknownMethod};
pub use error::{StoreError, StoreResult};
pub use flat::FlatBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{BackendKind, DurableStore, SQLITE_FILE};
