//! Store backend trait definition.

use crate::entry::{FormSnapshot, NewQueueEntry, QueueEntry};
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// A durable backend for the three store collections.
///
/// Backends persist the request queue, form snapshots, and key/value state.
/// Callers hold the trait object only; the concrete backend is chosen once
/// at startup and never changes for the process lifetime.
///
/// # Invariants
///
/// - `queue_add` assigns ids that never collide with existing entries and
///   never decrease within one store
/// - `queue_list` returns entries oldest-first by creation time, ties broken
///   by id
/// - `queue_remove`, `queue_update_retry`, `snapshot_clear`, and `kv_remove`
///   are no-ops (not errors) when the target is absent
/// - every operation is independently atomic: a failed operation leaves the
///   persisted state as it was before the call
///
/// # Implementors
///
/// - [`crate::SqliteBackend`] - transactional, preferred
/// - [`crate::FlatBackend`] - serialized-blob fallback
/// - [`crate::MemoryBackend`] - for testing
pub trait StoreBackend: Send + Sync {
    /// Persists a new queue entry, assigning its id and creation time.
    ///
    /// Returns the assigned id.
    fn queue_add(&self, entry: NewQueueEntry) -> StoreResult<u64>;

    /// Returns all queue entries, oldest-first.
    fn queue_list(&self) -> StoreResult<Vec<QueueEntry>>;

    /// Deletes one queue entry. No-op if absent.
    fn queue_remove(&self, id: u64) -> StoreResult<()>;

    /// Sets an entry's retry count and last-retry time. No-op if absent.
    fn queue_update_retry(
        &self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Returns the number of queued entries.
    fn queue_count(&self) -> StoreResult<u64>;

    /// Deletes all queue entries.
    fn queue_clear(&self) -> StoreResult<()>;

    /// Saves (or overwrites) the snapshot for a form.
    fn snapshot_save(&self, form_id: &str, fields: BTreeMap<String, String>) -> StoreResult<()>;

    /// Returns the snapshot for a form, if one exists.
    fn snapshot_get(&self, form_id: &str) -> StoreResult<Option<FormSnapshot>>;

    /// Deletes the snapshot for a form. No-op if absent.
    fn snapshot_clear(&self, form_id: &str) -> StoreResult<()>;

    /// Sets a key to a value.
    fn kv_set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Returns the value for a key, if present.
    fn kv_get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Deletes a key. No-op if absent.
    fn kv_remove(&self, key: &str) -> StoreResult<()>;
}
