//! The durable store facade and backend selection.

use crate::backend::StoreBackend;
use crate::entry::{FormSnapshot, NewQueueEntry, QueueEntry};
use crate::error::StoreResult;
use crate::flat::FlatBackend;
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// File name of the SQLite database within the store directory.
pub const SQLITE_FILE: &str = "tidesync.db";

/// Which backend a store ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The transactional SQLite backend.
    Sqlite,
    /// The flat serialized fallback.
    Flat,
    /// The in-memory backend.
    Memory,
}

/// Key-addressed durable persistence with a preferred and a fallback tier.
///
/// The store owns all persisted bytes for the sync subsystem. The backend is
/// picked once in [`DurableStore::open`] and is sticky for the process
/// lifetime - there is no mid-session migration between tiers.
///
/// A per-operation failure on the chosen backend surfaces as an `Err` to the
/// caller; the engine treats that as "not yet recorded", never as success.
pub struct DurableStore {
    backend: Box<dyn StoreBackend>,
    kind: BackendKind,
}

impl DurableStore {
    /// Opens a store in the given directory.
    ///
    /// Tries the SQLite backend first. If it fails to initialize, the
    /// failure is logged and the store silently downgrades to the flat
    /// fallback - callers only see an error if the fallback cannot open
    /// either.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        match SqliteBackend::open(&dir.join(SQLITE_FILE)) {
            Ok(backend) => {
                debug!("opened sqlite store in {:?}", dir);
                Ok(Self {
                    backend: Box::new(backend),
                    kind: BackendKind::Sqlite,
                })
            }
            Err(error) => {
                warn!(
                    "sqlite store unavailable in {:?}, falling back to flat store: {}",
                    dir, error
                );
                let backend = FlatBackend::open(dir)?;
                Ok(Self {
                    backend: Box::new(backend),
                    kind: BackendKind::Flat,
                })
            }
        }
    }

    /// Creates a store with no persistence, for tests and ephemeral use.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            kind: BackendKind::Memory,
        }
    }

    /// Returns which backend this store selected at open time.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Persists a new queue entry and returns its assigned id.
    ///
    /// Does not block beyond the backend's native write latency.
    pub fn queue_add(&self, entry: NewQueueEntry) -> StoreResult<u64> {
        self.backend.queue_add(entry)
    }

    /// Returns all queue entries, oldest-first by creation order (ties
    /// broken by id).
    pub fn queue_list(&self) -> StoreResult<Vec<QueueEntry>> {
        self.backend.queue_list()
    }

    /// Deletes one queue entry. No-op if absent.
    pub fn queue_remove(&self, id: u64) -> StoreResult<()> {
        self.backend.queue_remove(id)
    }

    /// Records a failed retry on an entry. No-op if absent.
    pub fn queue_update_retry(
        &self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.backend.queue_update_retry(id, retry_count, last_retry_at)
    }

    /// Returns the number of queued entries.
    pub fn queue_count(&self) -> StoreResult<u64> {
        self.backend.queue_count()
    }

    /// Deletes all queue entries.
    pub fn queue_clear(&self) -> StoreResult<()> {
        self.backend.queue_clear()
    }

    /// Saves (or overwrites) the snapshot for a form.
    pub fn snapshot_save(
        &self,
        form_id: &str,
        fields: BTreeMap<String, String>,
    ) -> StoreResult<()> {
        self.backend.snapshot_save(form_id, fields)
    }

    /// Returns the snapshot for a form, if one exists.
    pub fn snapshot_get(&self, form_id: &str) -> StoreResult<Option<FormSnapshot>> {
        self.backend.snapshot_get(form_id)
    }

    /// Deletes the snapshot for a form. No-op if absent.
    pub fn snapshot_clear(&self, form_id: &str) -> StoreResult<()> {
        self.backend.snapshot_clear(form_id)
    }

    /// Sets a key to a value.
    pub fn kv_set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.backend.kv_set(key, value)
    }

    /// Returns the value for a key, or `None` when absent (the caller
    /// supplies its own default).
    pub fn kv_get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.backend.kv_get(key)
    }

    /// Deletes a key. No-op if absent.
    pub fn kv_remove(&self, key: &str) -> StoreResult<()> {
        self.backend.kv_remove(key)
    }
}
