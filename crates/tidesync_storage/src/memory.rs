//! In-memory store backend for testing.

use crate::backend::StoreBackend;
use crate::entry::{FormSnapshot, NewQueueEntry, QueueEntry};
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

/// The three collections held in memory.
///
/// This is the working state shared by [`MemoryBackend`] and
/// [`crate::FlatBackend`]; the flat backend persists it, the memory backend
/// does not.
#[derive(Debug, Clone, Default)]
pub(crate) struct Collections {
    pub(crate) next_id: u64,
    pub(crate) queue: Vec<QueueEntry>,
    pub(crate) snapshots: BTreeMap<String, FormSnapshot>,
    pub(crate) kv: BTreeMap<String, Value>,
}

impl Collections {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn queue_add(&mut self, entry: NewQueueEntry, now: DateTime<Utc>) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.queue.push(QueueEntry {
            id,
            endpoint: entry.endpoint,
            method: entry.method,
            payload: entry.payload,
            headers: entry.headers,
            created_at: now,
            retry_count: 0,
            last_retry_at: None,
        });
        id
    }

    pub(crate) fn queue_list(&self) -> Vec<QueueEntry> {
        let mut entries = self.queue.clone();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    pub(crate) fn queue_remove(&mut self, id: u64) {
        self.queue.retain(|entry| entry.id != id);
    }

    pub(crate) fn queue_update_retry(
        &mut self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) {
        if let Some(entry) = self.queue.iter_mut().find(|entry| entry.id == id) {
            entry.retry_count = retry_count;
            entry.last_retry_at = Some(last_retry_at);
        }
    }
}

/// An in-memory store backend.
///
/// Holds all three collections in memory with no persistence. Suitable for
/// unit tests, integration tests, and ephemeral stores that do not need to
/// survive a restart.
///
/// # Example
///
/// ```rust
/// use tidesync_storage::{MemoryBackend, Method, NewQueueEntry, StoreBackend};
///
/// let backend = MemoryBackend::new();
/// let id = backend
///     .queue_add(NewQueueEntry::new("/logs", Method::Post))
///     .unwrap();
/// assert_eq!(backend.queue_list().unwrap()[0].id, id);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Collections>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Collections::new()),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn queue_add(&self, entry: NewQueueEntry) -> StoreResult<u64> {
        Ok(self.state.lock().queue_add(entry, Utc::now()))
    }

    fn queue_list(&self) -> StoreResult<Vec<QueueEntry>> {
        Ok(self.state.lock().queue_list())
    }

    fn queue_remove(&self, id: u64) -> StoreResult<()> {
        self.state.lock().queue_remove(id);
        Ok(())
    }

    fn queue_update_retry(
        &self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .queue_update_retry(id, retry_count, last_retry_at);
        Ok(())
    }

    fn queue_count(&self) -> StoreResult<u64> {
        Ok(self.state.lock().queue.len() as u64)
    }

    fn queue_clear(&self) -> StoreResult<()> {
        self.state.lock().queue.clear();
        Ok(())
    }

    fn snapshot_save(&self, form_id: &str, fields: BTreeMap<String, String>) -> StoreResult<()> {
        self.state.lock().snapshots.insert(
            form_id.to_string(),
            FormSnapshot {
                form_id: form_id.to_string(),
                fields,
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn snapshot_get(&self, form_id: &str) -> StoreResult<Option<FormSnapshot>> {
        Ok(self.state.lock().snapshots.get(form_id).cloned())
    }

    fn snapshot_clear(&self, form_id: &str) -> StoreResult<()> {
        self.state.lock().snapshots.remove(form_id);
        Ok(())
    }

    fn kv_set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.state.lock().kv.insert(key.to_string(), value);
        Ok(())
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.state.lock().kv.get(key).cloned())
    }

    fn kv_remove(&self, key: &str) -> StoreResult<()> {
        self.state.lock().kv.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Method;
    use serde_json::json;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let backend = MemoryBackend::new();
        let a = backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        let b = backend
            .queue_add(NewQueueEntry::new("/b", Method::Put))
            .unwrap();
        assert!(b > a);

        // Removing the newest entry must not recycle its id.
        backend.queue_remove(b).unwrap();
        let c = backend
            .queue_add(NewQueueEntry::new("/c", Method::Post))
            .unwrap();
        assert!(c > b);
    }

    #[test]
    fn list_is_oldest_first() {
        let backend = MemoryBackend::new();
        for endpoint in ["/1", "/2", "/3"] {
            backend
                .queue_add(NewQueueEntry::new(endpoint, Method::Post))
                .unwrap();
        }

        let entries = backend.queue_list().unwrap();
        let endpoints: Vec<_> = entries.iter().map(|e| e.endpoint.as_str()).collect();
        assert_eq!(endpoints, ["/1", "/2", "/3"]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let backend = MemoryBackend::new();
        backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        backend.queue_remove(999).unwrap();
        assert_eq!(backend.queue_count().unwrap(), 1);
    }

    #[test]
    fn update_retry_mutates_entry() {
        let backend = MemoryBackend::new();
        let id = backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();

        let at = Utc::now();
        backend.queue_update_retry(id, 3, at).unwrap();

        let entry = &backend.queue_list().unwrap()[0];
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.last_retry_at, Some(at));

        // Absent id is a no-op, not an error.
        backend.queue_update_retry(999, 1, at).unwrap();
    }

    #[test]
    fn clear_empties_queue() {
        let backend = MemoryBackend::new();
        backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        backend.queue_clear().unwrap();
        assert_eq!(backend.queue_count().unwrap(), 0);
    }

    #[test]
    fn snapshot_roundtrip() {
        let backend = MemoryBackend::new();
        let fields = BTreeMap::from([("a".to_string(), "1".to_string())]);

        backend.snapshot_save("soundings", fields.clone()).unwrap();
        let snapshot = backend.snapshot_get("soundings").unwrap().unwrap();
        assert_eq!(snapshot.fields, fields);

        backend.snapshot_clear("soundings").unwrap();
        assert!(backend.snapshot_get("soundings").unwrap().is_none());
    }

    #[test]
    fn kv_roundtrip() {
        let backend = MemoryBackend::new();
        backend.kv_set("last_hitch", json!("2026-08-01")).unwrap();
        assert_eq!(
            backend.kv_get("last_hitch").unwrap(),
            Some(json!("2026-08-01"))
        );

        backend.kv_remove("last_hitch").unwrap();
        assert_eq!(backend.kv_get("last_hitch").unwrap(), None);
        backend.kv_remove("last_hitch").unwrap();
    }
}
