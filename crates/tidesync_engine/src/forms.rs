//! Debounced form auto-save over the durable store.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tidesync_storage::{DurableStore, StoreResult};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Auto-save binding for one form.
///
/// The host's form wiring feeds field changes in; the binding persists a
/// [`FormSnapshot`](tidesync_storage::FormSnapshot) after a debounce window
/// (or immediately for discrete selection-style changes) and clears it when
/// the form submits successfully. [`restore`](FormAutoSave::restore) brings
/// the latest snapshot back after a reload or disconnect.
pub struct FormAutoSave {
    form_id: String,
    store: Arc<DurableStore>,
    debounce: Duration,
    fields: Mutex<BTreeMap<String, String>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl FormAutoSave {
    /// Creates a binding for a form.
    pub fn new(
        form_id: impl Into<String>,
        store: Arc<DurableStore>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            form_id: form_id.into(),
            store,
            debounce,
            fields: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(None),
        })
    }

    /// Returns the form's identity.
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// Records a field edit and schedules a debounced save.
    ///
    /// Each change restarts the debounce window; only the trailing edit
    /// triggers a write. Must be called from within a tokio runtime.
    pub fn field_changed(self: &Arc<Self>, name: impl Into<String>, value: impl Into<String>) {
        self.fields.lock().insert(name.into(), value.into());

        let mut pending = self.pending.lock();
        if let Some(task) = pending.take() {
            task.abort();
        }
        let form = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(form.debounce).await;
            if let Err(error) = form.save_now() {
                warn!("auto-save for form '{}' failed: {}", form.form_id, error);
            }
        }));
    }

    /// Records a discrete selection-style change and persists immediately.
    pub fn field_committed(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> StoreResult<()> {
        self.fields.lock().insert(name.into(), value.into());
        self.save_now()
    }

    /// Persists the current field set as the form's snapshot.
    fn save_now(&self) -> StoreResult<()> {
        let fields = self.fields.lock().clone();
        debug!("saving snapshot for form '{}'", self.form_id);
        self.store.snapshot_save(&self.form_id, fields)
    }

    /// Reports a confirmed successful submission: cancels any pending save
    /// and destroys the snapshot.
    pub fn submitted(&self) -> StoreResult<()> {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
        self.store.snapshot_clear(&self.form_id)
    }

    /// Reads the latest snapshot's fields, or `None` when no snapshot
    /// exists.
    ///
    /// Restored fields also become the binding's current field set, so a
    /// later save does not lose them.
    pub fn restore(&self) -> StoreResult<Option<BTreeMap<String, String>>> {
        match self.store.snapshot_get(&self.form_id)? {
            None => Ok(None),
            Some(snapshot) => {
                *self.fields.lock() = snapshot.fields.clone();
                Ok(Some(snapshot.fields))
            }
        }
    }
}

impl Drop for FormAutoSave {
    fn drop(&mut self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }
}
