//! # Tidesync Engine
//!
//! Offline-aware request engine for tidesync.
//!
//! This crate provides:
//! - Connectivity tracking with listener fan-out and an active probe
//! - An offline-aware request wrapper that queues failed mutations
//! - A sequential drain loop with table-driven backoff
//! - A periodic drain timer bound to connectivity transitions
//! - Debounced form auto-save over the durable store
//!
//! ## Architecture
//!
//! A mutating call enters [`SyncEngine::request`]. While online it is
//! attempted immediately; a transport failure persists the request into the
//! [`DurableStore`](tidesync_storage::DurableStore) queue and reports a
//! **queued** outcome rather than an error. When the
//! [`ConnectivityMonitor`] transitions back online (or the periodic timer
//! fires), [`SyncEngine::sync_queue`] drains the queue oldest-first,
//! removing delivered entries, discarding client-rejected ones, and
//! rescheduling the rest under the [`BackoffSchedule`].
//!
//! ## Key Invariants
//!
//! - GET requests are never queued
//! - At most one drain pass is in flight at a time
//! - Entries drain strictly sequentially, oldest-first
//! - A failing entry is never silently dropped; it retries at the backoff
//!   ceiling until delivered, discarded by a client error, or cleared
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidesync_engine::{ConnectivityMonitor, EngineConfig, SyncEngine};
//! use tidesync_storage::DurableStore;
//!
//! let store = Arc::new(DurableStore::open("./data")?);
//! let monitor = Arc::new(ConnectivityMonitor::new(true));
//! let engine = Arc::new(SyncEngine::new(
//!     EngineConfig::new("https://orb.example.com"),
//!     store,
//!     Arc::clone(&monitor),
//!     client, // any HttpClient implementation
//! ));
//! engine.attach();
//!
//! // The host's network-event wiring drives the monitor:
//! monitor.set_online(false);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod feed;
mod forms;
mod http;
mod monitor;
mod notify;

pub use config::{BackoffSchedule, EngineConfig};
pub use engine::{DrainReport, DrainStatus, RequestOutcome, SkipReason, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use feed::{StatusEvent, StatusFeed, Subscription};
pub use forms::FormAutoSave;
pub use http::{HttpClient, HttpRequest, HttpResponse, MockHttpClient};
pub use monitor::{ConnectivityMonitor, ConnectivityState};
pub use notify::{LogSink, NotificationSink, Severity, DEFAULT_NOTIFICATION_DURATION};

pub use tidesync_storage::Method;
