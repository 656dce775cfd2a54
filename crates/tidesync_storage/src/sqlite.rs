//! SQLite store backend.

use crate::backend::StoreBackend;
use crate::entry::{FormSnapshot, Method, NewQueueEntry, QueueEntry};
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// SQL schema for the store database.
const SCHEMA: &str = r#"
-- Mutating requests awaiting redelivery. AUTOINCREMENT keeps ids monotonic
-- even after the newest entry is removed.
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    payload TEXT,
    headers TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_retry_at TEXT
);

-- In-progress form input, one snapshot per form.
CREATE TABLE IF NOT EXISTS form_snapshots (
    form_id TEXT PRIMARY KEY,
    fields TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

-- Miscellaneous client state.
CREATE TABLE IF NOT EXISTS key_value (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_created ON queue(created_at, id);
"#;

/// Parse an RFC3339 timestamp from the database.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Parse a JSON column from the database.
fn parse_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, rusqlite::Error> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_entry(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    let method: String = row.get(2)?;
    let payload: Option<String> = row.get(3)?;
    let headers: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let last_retry_at: Option<String> = row.get(7)?;

    Ok(QueueEntry {
        id: row.get::<_, i64>(0)? as u64,
        endpoint: row.get(1)?,
        method: method.parse::<Method>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        payload: payload
            .as_deref()
            .map(|p| parse_json(p))
            .transpose()?,
        headers: parse_json(&headers)?,
        created_at: parse_timestamp(&created_at)?,
        retry_count: row.get(6)?,
        last_retry_at: last_retry_at
            .as_deref()
            .map(|t| parse_timestamp(t))
            .transpose()?,
    })
}

/// The preferred, transactional store backend.
///
/// Every operation is a single SQLite statement and therefore atomic. The
/// connection is held behind a mutex; the engine only ever issues one store
/// operation at a time, so contention is not a concern here.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) the store database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema cannot be applied. Callers
    /// normally let [`crate::DurableStore::open`] downgrade to the flat
    /// backend in that case.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StoreBackend for SqliteBackend {
    fn queue_add(&self, entry: NewQueueEntry) -> StoreResult<u64> {
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let headers = serde_json::to_string(&entry.headers)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO queue (endpoint, method, payload, headers, created_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                entry.endpoint,
                entry.method.as_str(),
                payload,
                headers,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn queue_list(&self) -> StoreResult<Vec<QueueEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, endpoint, method, payload, headers, created_at, retry_count, last_retry_at
             FROM queue ORDER BY created_at ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn queue_remove(&self, id: u64) -> StoreResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM queue WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    fn queue_update_retry(
        &self,
        id: u64,
        retry_count: u32,
        last_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.conn.lock().execute(
            "UPDATE queue SET retry_count = ?1, last_retry_at = ?2 WHERE id = ?3",
            params![retry_count, last_retry_at.to_rfc3339(), id as i64],
        )?;
        Ok(())
    }

    fn queue_count(&self) -> StoreResult<u64> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn queue_clear(&self) -> StoreResult<()> {
        self.conn.lock().execute("DELETE FROM queue", [])?;
        Ok(())
    }

    fn snapshot_save(&self, form_id: &str, fields: BTreeMap<String, String>) -> StoreResult<()> {
        let fields = serde_json::to_string(&fields)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO form_snapshots (form_id, fields, saved_at)
             VALUES (?1, ?2, ?3)",
            params![form_id, fields, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn snapshot_get(&self, form_id: &str) -> StoreResult<Option<FormSnapshot>> {
        let snapshot = self
            .conn
            .lock()
            .query_row(
                "SELECT fields, saved_at FROM form_snapshots WHERE form_id = ?1",
                params![form_id],
                |row| {
                    let fields: String = row.get(0)?;
                    let saved_at: String = row.get(1)?;
                    Ok(FormSnapshot {
                        form_id: form_id.to_string(),
                        fields: parse_json(&fields)?,
                        saved_at: parse_timestamp(&saved_at)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn snapshot_clear(&self, form_id: &str) -> StoreResult<()> {
        self.conn.lock().execute(
            "DELETE FROM form_snapshots WHERE form_id = ?1",
            params![form_id],
        )?;
        Ok(())
    }

    fn kv_set(&self, key: &str, value: Value) -> StoreResult<()> {
        let value = serde_json::to_string(&value)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO key_value (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<Value>> {
        let value: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM key_value WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        }
    }

    fn kv_remove(&self, key: &str) -> StoreResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM key_value WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_assigns_monotonic_ids() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let a = backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();
        let b = backend
            .queue_add(NewQueueEntry::new("/b", Method::Delete))
            .unwrap();
        assert!(b > a);

        backend.queue_remove(b).unwrap();
        let c = backend
            .queue_add(NewQueueEntry::new("/c", Method::Post))
            .unwrap();
        assert!(c > b, "AUTOINCREMENT must not recycle removed ids");
    }

    #[test]
    fn entry_fields_survive_roundtrip() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let id = backend
            .queue_add(
                NewQueueEntry::new("/soundings", Method::Put)
                    .with_payload(json!({"tank": "S2", "depth": 1.75}))
                    .with_header("X-Request-Source", "soundings"),
            )
            .unwrap();

        let entries = backend.queue_list().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, id);
        assert_eq!(entry.endpoint, "/soundings");
        assert_eq!(entry.method, Method::Put);
        assert_eq!(entry.payload, Some(json!({"tank": "S2", "depth": 1.75})));
        assert_eq!(
            entry.headers.get("X-Request-Source").map(String::as_str),
            Some("soundings")
        );
        assert_eq!(entry.retry_count, 0);
        assert!(entry.last_retry_at.is_none());
    }

    #[test]
    fn update_retry_and_absent_noop() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let id = backend
            .queue_add(NewQueueEntry::new("/a", Method::Post))
            .unwrap();

        let at = Utc::now();
        backend.queue_update_retry(id, 2, at).unwrap();
        let entry = &backend.queue_list().unwrap()[0];
        assert_eq!(entry.retry_count, 2);
        assert!(entry.last_retry_at.is_some());

        backend.queue_update_retry(9999, 1, at).unwrap();
        backend.queue_remove(9999).unwrap();
        assert_eq!(backend.queue_count().unwrap(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .queue_add(NewQueueEntry::new("/a", Method::Post))
                .unwrap();
            backend
                .snapshot_save("f", BTreeMap::from([("x".into(), "1".into())]))
                .unwrap();
            backend.kv_set("k", json!(42)).unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.queue_count().unwrap(), 1);
        assert!(backend.snapshot_get("f").unwrap().is_some());
        assert_eq!(backend.kv_get("k").unwrap(), Some(json!(42)));
    }

    #[test]
    fn snapshot_overwrite_and_clear() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .snapshot_save("f", BTreeMap::from([("a".into(), "1".into())]))
            .unwrap();
        backend
            .snapshot_save("f", BTreeMap::from([("a".into(), "2".into())]))
            .unwrap();

        let snapshot = backend.snapshot_get("f").unwrap().unwrap();
        assert_eq!(snapshot.fields.get("a").map(String::as_str), Some("2"));

        backend.snapshot_clear("f").unwrap();
        assert!(backend.snapshot_get("f").unwrap().is_none());
        backend.snapshot_clear("f").unwrap();
    }

    #[test]
    fn queue_clear() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        for _ in 0..3 {
            backend
                .queue_add(NewQueueEntry::new("/a", Method::Post))
                .unwrap();
        }
        backend.queue_clear().unwrap();
        assert_eq!(backend.queue_count().unwrap(), 0);
        assert!(backend.queue_list().unwrap().is_empty());
    }
}
