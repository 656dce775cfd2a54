//! Flat serialized fallback backend.
//!
//! Used when the SQLite backend fails to initialize. Each collection is one
//! JSON blob on disk:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK             # advisory lock, single process
//! ├─ queue.json       # { next_id, entries } for the request queue
//! ├─ snapshots.json   # form_id → snapshot
//! └─ kv.json          # key → value
//! ```
//!
//! All collections are loaded into memory at open. A mutation clones the
//! state, applies the change, rewrites the touched blob through a temp file
//! and rename, and only then commits the in-memory copy, so a failed write
//! leaves both memory and disk as they were.

use crate::backend::StoreBackend;
use crate::entry::{FormSnapshot, NewQueueEntry, QueueEntry};
use crate::error::{StoreError, StoreResult};
use crate::memory::Collections;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";
const QUEUE_FILE: &str = "queue.json";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const KV_FILE: &str = "kv.json";

/// On-disk form of the queue collection.
///
/// Carries its own id counter so ids stay collision-free across restarts
/// even after the highest entry has been removed.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueBlob {
    next_id: u64,
    entries: Vec<QueueEntry>,
}

/// Reads a blob file, falling back to the default on any failure.
///
/// The fallback tier must stay available even with a damaged blob; an
/// unreadable collection starts empty (matching parse-or-default reads in
/// the structured tier's absence) and the damage is logged.
fn read_blob<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match fs::read(path).map_err(StoreError::from).and_then(|bytes| {
        serde_json::from_slice(&bytes).map_err(StoreError::from)
    }) {
        Ok(value) => value,
        Err(error) => {
            warn!("unreadable blob {:?}, starting empty: {}", path, error);
            T::default()
        }
    }
}

/// Writes a blob through a temp file and rename.
fn write_blob<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// The flat key-value fallback backend.
///
/// Preserves the full store contract (ordering, no-op-on-absent, atomic
/// per-operation writes) over plain serialized blobs.
pub struct FlatBackend {
    dir: PathBuf,
    state: Mutex<Collections>,
    /// Held for the backend's lifetime; released on drop.
    _lock_file: File,
}

impl FlatBackend {
    /// Opens (or creates) a flat store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the store
    /// directory, or an I/O error if the directory cannot be created.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: dir.to_path_buf(),
            });
        }

        let queue: QueueBlob = read_blob(&dir.join(QUEUE_FILE));
        let snapshots: BTreeMap<String, FormSnapshot> = read_blob(&dir.join(SNAPSHOTS_FILE));
        let kv: BTreeMap<String, Value> = read_blob(&dir.join(KV_FILE));

        let highest = queue.entries.iter().map(|e| e.id).max().unwrap_or(0);
        let state = Collections {
            next_id: queue.next_id.max(highest + 1).max(1),
            queue: queue.entries,
            snapshots,
            kv,
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(state),
            _lock_file: lock_file,
        })
    }

    fn write_queue(&self, state: &Collections) -> StoreResult<()> {
        write_blob(
            &self.dir.join(QUEUE_FILE),
            &QueueBlob {
                next_id: state.next_id,
                entries: state.queue.clone(),
            },
        )
    }

    fn write_snapshots(&self, state: &Collections) -> StoreResult<()> {
        write_blob(&self.dir.join(SNAPSHOTS_FILE), &state.snapshots)
    }

    fn write_kv(&self, state: &Collections) -> StoreResult<()> {
        write_blob(&self.dir.join(KV_FILE), &state.kv)
    }
}

impl StoreBackend for FlatBackend {
    fn queue_add(&self, entry: NewQueueEntry) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let id = next.queue_add(entry, Utc::now());
        self.write_queue(&next)?;
        *state = next;
        Ok(id)
    }

    fn queue_list(&self) -> StoreResult<Vec<QueueEntry>> {
        Ok(self.state.lock().queue_list())
    }

    fn queue_remove(&self, id: u64) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.queue_remove(id);
        self.write_queue(&next)?;
        *state = next;
        Ok(())
    }

    fn queue_update_retry(
        &self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.queue_update_retry(id, retry_count, last_retry_at);
        self.write_queue(&next)?;
        *state = next;
        Ok(())
    }

    fn queue_count(&self) -> StoreResult<u64> {
        Ok(self.state.lock().queue.len() as u64)
    }

    fn queue_clear(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.queue.clear();
        self.write_queue(&next)?;
        *state = next;
        Ok(())
    }

    fn snapshot_save(&self, form_id: &str, fields: BTreeMap<String, String>) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.snapshots.insert(
            form_id.to_string(),
            FormSnapshot {
                form_id: form_id.to_string(),
                fields,
                saved_at: Utc::now(),
            },
        );
        self.write_snapshots(&next)?;
        *state = next;
        Ok(())
    }

    fn snapshot_get(&self, form_id: &str) -> StoreResult<Option<FormSnapshot>> {
        Ok(self.state.lock().snapshots.get(form_id).cloned())
    }

    fn snapshot_clear(&self, form_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.snapshots.remove(form_id);
        self.write_snapshots(&next)?;
        *state = next;
        Ok(())
    }

    fn kv_set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.kv.insert(key.to_string(), value);
        self.write_kv(&next)?;
        *state = next;
        Ok(())
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.state.lock().kv.get(key).cloned())
    }

    fn kv_remove(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.kv.remove(key);
        self.write_kv(&next)?;
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Method;
    use serde_json::json;

    fn open(dir: &Path) -> FlatBackend {
        FlatBackend::open(dir).unwrap()
    }

    #[test]
    fn queue_contract() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(dir.path());

        let a = backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        let b = backend
            .queue_add(NewQueueEntry::new("/b", Method::Put))
            .unwrap();
        assert!(b > a);

        let endpoints: Vec<_> = backend
            .queue_list()
            .unwrap()
            .into_iter()
            .map(|e| e.endpoint)
            .collect();
        assert_eq!(endpoints, ["/a", "/b"]);

        backend.queue_remove(a).unwrap();
        backend.queue_remove(999).unwrap();
        assert_eq!(backend.queue_count().unwrap(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let backend = open(dir.path());
            id = backend
                .queue_add(
                    NewQueueEntry::new("/logs", Method::Post).with_payload(json!({"v": 1})),
                )
                .unwrap();
            backend.queue_update_retry(id, 2, Utc::now()).unwrap();
            backend
                .snapshot_save("f", BTreeMap::from([("a".into(), "1".into())]))
                .unwrap();
            backend.kv_set("k", json!([1, 2])).unwrap();
        }

        let backend = open(dir.path());
        let entries = backend.queue_list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].retry_count, 2);
        assert!(backend.snapshot_get("f").unwrap().is_some());
        assert_eq!(backend.kv_get("k").unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn ids_survive_reopen_after_removal() {
        let dir = tempfile::tempdir().unwrap();
        let b;
        {
            let backend = open(dir.path());
            backend
                .queue_add(NewQueueEntry::new("/a", Method::Post))
                .unwrap();
            b = backend
                .queue_add(NewQueueEntry::new("/b", Method::Post))
                .unwrap();
            backend.queue_remove(b).unwrap();
        }

        let backend = open(dir.path());
        let c = backend
            .queue_add(NewQueueEntry::new("/c", Method::Post))
            .unwrap();
        assert!(c > b, "persisted next_id must not recycle removed ids");
    }

    #[test]
    fn corrupt_blob_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(QUEUE_FILE), b"{not json").unwrap();
        fs::write(dir.path().join(KV_FILE), b"[1, 2,").unwrap();

        let backend = open(dir.path());
        assert_eq!(backend.queue_count().unwrap(), 0);
        assert_eq!(backend.kv_get("k").unwrap(), None);

        // And the store is writable again afterwards.
        backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        assert_eq!(backend.queue_count().unwrap(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _first = open(dir.path());

        match FlatBackend::open(dir.path()) {
            Err(StoreError::Locked { path }) => assert_eq!(path, dir.path()),
            other => panic!("expected Locked, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(dir.path());
        backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        backend.kv_set("k", json!(1)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
