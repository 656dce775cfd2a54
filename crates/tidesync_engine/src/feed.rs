//! Status event fan-out to registered listeners.

use crate::engine::DrainReport;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// A connectivity or sync status event.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// The network became available.
    Online,
    /// The network became unavailable.
    Offline,
    /// A request was persisted for later delivery.
    Queued {
        /// Id of the queued entry.
        entry_id: u64,
    },
    /// A drain pass completed.
    Synced {
        /// Aggregate counts for the pass.
        report: DrainReport,
    },
}

impl StatusEvent {
    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::Online => "online",
            StatusEvent::Offline => "offline",
            StatusEvent::Queued { .. } => "queued",
            StatusEvent::Synced { .. } => "synced",
        }
    }
}

type Listener = Arc<dyn Fn(&StatusEvent) + Send + Sync>;
type ListenerList = RwLock<Vec<(u64, Listener)>>;

/// An explicit observer list with isolated invocation.
///
/// Listeners are invoked in registration order. A panicking listener is
/// caught and logged; it never prevents later listeners from being
/// notified.
#[derive(Default)]
pub struct StatusFeed {
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl StatusFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    ///
    /// Returns a [`Subscription`] handle; call
    /// [`unsubscribe`](Subscription::unsubscribe) to remove the listener.
    pub fn subscribe(&self, listener: impl Fn(&StatusEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Notifies every listener of an event.
    pub fn emit(&self, event: &StatusEvent) {
        // Snapshot the list so a listener can unsubscribe (or subscribe)
        // without deadlocking against the dispatch.
        let snapshot: Vec<(u64, Listener)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("status listener {} panicked on '{}' event", id, event.name());
            }
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

/// Unregistration handle returned by [`StatusFeed::subscribe`].
///
/// Dropping the handle does not unregister the listener; only
/// [`unsubscribe`](Subscription::unsubscribe) does.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Removes the listener this handle was issued for.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}
