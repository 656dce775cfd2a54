//! The offline-aware request engine and queue drain loop.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::feed::{StatusEvent, Subscription};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::monitor::{ConnectivityMonitor, ConnectivityState};
use crate::notify::{LogSink, NotificationSink, Severity, DEFAULT_NOTIFICATION_DURATION};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidesync_storage::{DurableStore, Method, NewQueueEntry, QueueEntry};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of [`SyncEngine::request`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The request completed with a 2xx response; the parsed body.
    Completed(Value),
    /// The request was persisted for later delivery. A successful degraded
    /// outcome, not a failure.
    Queued {
        /// Id of the persisted queue entry.
        entry_id: u64,
    },
}

impl RequestOutcome {
    /// Returns true if the request was queued rather than delivered.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, RequestOutcome::Queued { .. })
    }
}

/// Aggregate counts for one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Entries the pass attempted.
    pub attempted: u64,
    /// Entries delivered and removed.
    pub succeeded: u64,
    /// Entries removed on a client-error response without delivery.
    pub discarded: u64,
    /// Entries still queued after the pass.
    pub still_pending: u64,
}

impl DrainReport {
    /// Renders the counts for the notification sink.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Synced {} of {} queued request(s)",
            self.succeeded, self.attempted
        );
        if self.discarded > 0 {
            summary.push_str(&format!(", {} discarded", self.discarded));
        }
        if self.still_pending > 0 {
            summary.push_str(&format!(", {} still pending", self.still_pending));
        }
        summary
    }
}

/// Why a drain pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The monitor reports the network as offline.
    Offline,
    /// Another drain pass is already in flight.
    AlreadyRunning,
}

/// Result of a [`SyncEngine::sync_queue`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainStatus {
    /// The pass was skipped entirely.
    Skipped(SkipReason),
    /// The pass ran to completion.
    Ran(DrainReport),
}

/// How a single replayed entry fared.
enum Replay {
    /// 2xx - delivered, remove the entry.
    Delivered,
    /// 4xx - the server will never accept this request; remove it.
    Discarded,
    /// 5xx or transport failure - keep the entry for another pass.
    Failed,
}

/// The offline-aware request engine.
///
/// Owns no durable state itself; all persistence goes through the
/// [`DurableStore`], and all connectivity state lives in the
/// [`ConnectivityMonitor`]. The engine holds only in-memory scheduling:
/// the periodic timer task, its monitor subscription, and the runtime
/// handle captured by [`attach`](SyncEngine::attach).
pub struct SyncEngine<C: HttpClient> {
    config: EngineConfig,
    store: Arc<DurableStore>,
    monitor: Arc<ConnectivityMonitor>,
    client: Arc<C>,
    sink: Arc<dyn NotificationSink>,
    runtime: Mutex<Option<Handle>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<C: HttpClient + 'static> SyncEngine<C> {
    /// Creates an engine. Notifications go to the log until a sink is
    /// installed with [`with_sink`](SyncEngine::with_sink).
    pub fn new(
        config: EngineConfig,
        store: Arc<DurableStore>,
        monitor: Arc<ConnectivityMonitor>,
        client: C,
    ) -> Self {
        Self {
            config,
            store,
            monitor,
            client: Arc::new(client),
            sink: Arc::new(LogSink),
            runtime: Mutex::new(None),
            timer: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Replaces the notification sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a snapshot of the connectivity flags.
    pub fn state(&self) -> ConnectivityState {
        self.monitor.state()
    }

    /// Wires the engine to its monitor and starts scheduling.
    ///
    /// Must be called from within a tokio runtime. On the monitor's
    /// `online` transition the engine spawns an immediate drain pass and
    /// starts the periodic timer; on `offline` it stops the timer. If the
    /// monitor is already online, the timer starts right away.
    pub fn attach(self: &Arc<Self>) {
        *self.runtime.lock() = Some(Handle::current());

        let weak = Arc::downgrade(self);
        let subscription = self.monitor.on_status_change(move |event| {
            let Some(engine) = weak.upgrade() else { return };
            match event {
                StatusEvent::Online => {
                    engine.start_timer();
                    engine.spawn_drain();
                }
                StatusEvent::Offline => engine.stop_timer(),
                _ => {}
            }
        });
        *self.subscription.lock() = Some(subscription);

        if self.monitor.is_online() {
            self.start_timer();
        }
    }

    /// Tears the engine down: stops the timer and unregisters the monitor
    /// listener. Queued entries stay in the store for the next session.
    pub fn shutdown(&self) {
        self.stop_timer();
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    /// Actively probes the health endpoint, bypassing the cached state.
    pub async fn verify_connectivity(&self) -> bool {
        let url = format!("{}{}", self.config.base_url, self.config.health_path);
        self.monitor
            .verify_connectivity(self.client.as_ref(), &url, self.config.probe_timeout)
            .await
    }

    /// Issues an offline-aware request.
    ///
    /// - A GET while offline fails immediately with
    ///   [`SyncError::Offline`] and never touches the queue.
    /// - A mutating request that cannot reach the server is persisted and
    ///   reported as [`RequestOutcome::Queued`] when `queue_on_failure` is
    ///   set; queuing is a successful degraded outcome.
    /// - A received response is never queued: 2xx completes, 4xx/5xx
    ///   surface as [`SyncError::Client`]/[`SyncError::Server`].
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<Value>,
        headers: BTreeMap<String, String>,
        queue_on_failure: bool,
    ) -> SyncResult<RequestOutcome> {
        let may_queue = method.is_mutating() && queue_on_failure;

        if !self.monitor.is_online() {
            if !may_queue {
                return Err(SyncError::Offline);
            }
            // Known-offline mutation: skip the doomed attempt and persist
            // directly.
            let entry_id = self.enqueue(endpoint, method, payload, headers)?;
            return Ok(RequestOutcome::Queued { entry_id });
        }

        let request = self.build_request(endpoint, method, &headers, payload.as_ref());
        match self.send(request).await {
            Ok(response) if response.is_ok() => {
                let value = response.json().map_err(|e| {
                    SyncError::transport(format!("invalid response body: {}", e))
                })?;
                Ok(RequestOutcome::Completed(value))
            }
            Ok(response) => Err(SyncError::from_status(response.status)),
            Err(error) => {
                if !may_queue {
                    return Err(error);
                }
                debug!("request to {} failed, queuing: {}", endpoint, error);
                let entry_id = self.enqueue(endpoint, method, payload, headers)?;
                Ok(RequestOutcome::Queued { entry_id })
            }
        }
    }

    /// Drains the queue, oldest entries first.
    ///
    /// Skips entirely while offline or while another pass is in flight -
    /// a skipped pass is never queued behind the running one. Entries are
    /// replayed strictly sequentially; an entry that has failed before
    /// waits its backoff delay first. One entry's failure never aborts the
    /// pass for the entries behind it.
    pub async fn sync_queue(&self) -> SyncResult<DrainStatus> {
        if !self.monitor.is_online() {
            return Ok(DrainStatus::Skipped(SkipReason::Offline));
        }
        if !self.monitor.begin_drain() {
            debug!("drain pass already in flight, skipping");
            return Ok(DrainStatus::Skipped(SkipReason::AlreadyRunning));
        }

        let entries = match self.store.queue_list() {
            Ok(entries) => entries,
            Err(error) => {
                self.monitor.end_drain();
                return Err(error.into());
            }
        };

        let mut report = DrainReport {
            attempted: entries.len() as u64,
            ..DrainReport::default()
        };

        for entry in entries {
            if entry.retry_count > 0 {
                tokio::time::sleep(self.config.backoff.delay_for(entry.retry_count)).await;
            }

            match self.replay(&entry).await {
                Replay::Delivered => match self.store.queue_remove(entry.id) {
                    Ok(()) => report.succeeded += 1,
                    Err(error) => {
                        warn!("failed to remove delivered entry {}: {}", entry.id, error);
                        report.still_pending += 1;
                    }
                },
                Replay::Discarded => match self.store.queue_remove(entry.id) {
                    Ok(()) => report.discarded += 1,
                    Err(error) => {
                        warn!("failed to remove discarded entry {}: {}", entry.id, error);
                        report.still_pending += 1;
                    }
                },
                Replay::Failed => {
                    // Past the ceiling the count stays clamped; only the
                    // retry time moves. The entry is never dropped here.
                    let retry_count = if entry.retry_count < self.config.max_retries {
                        entry.retry_count + 1
                    } else {
                        entry.retry_count
                    };
                    if let Err(error) =
                        self.store.queue_update_retry(entry.id, retry_count, Utc::now())
                    {
                        warn!("failed to record retry for entry {}: {}", entry.id, error);
                    }
                    report.still_pending += 1;
                }
            }
        }

        self.monitor.end_drain();

        if report.attempted > 0 {
            info!(
                "drain pass complete: {} succeeded, {} discarded, {} pending",
                report.succeeded, report.discarded, report.still_pending
            );
            self.monitor.emit(&StatusEvent::Synced {
                report: report.clone(),
            });
            self.sink
                .notify(&report.summary(), Severity::Sync, DEFAULT_NOTIFICATION_DURATION);
        }

        Ok(DrainStatus::Ran(report))
    }

    /// Re-issues one queued request and classifies the outcome.
    async fn replay(&self, entry: &QueueEntry) -> Replay {
        let request = self.build_request(
            &entry.endpoint,
            entry.method,
            &entry.headers,
            entry.payload.as_ref(),
        );

        match self.send(request).await {
            Ok(response) if response.is_ok() => Replay::Delivered,
            Ok(response) if response.is_client_error() => {
                warn!(
                    "entry {} rejected with status {}, discarding",
                    entry.id, response.status
                );
                Replay::Discarded
            }
            Ok(response) => {
                debug!("entry {} failed with status {}", entry.id, response.status);
                Replay::Failed
            }
            Err(error) => {
                debug!("entry {} transport failure: {}", entry.id, error);
                Replay::Failed
            }
        }
    }

    /// Sends a request bounded by the configured timeout.
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        match tokio::time::timeout(self.config.request_timeout, self.client.send(request)).await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(SyncError::Transport { message }),
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Builds the outgoing request for an endpoint.
    ///
    /// The content type is fixed to JSON unless the caller's headers
    /// override it.
    fn build_request(
        &self,
        endpoint: &str,
        method: Method,
        headers: &BTreeMap<String, String>,
        payload: Option<&Value>,
    ) -> HttpRequest {
        let url = format!("{}{}{}", self.config.base_url, self.config.path_prefix, endpoint);
        let mut request = HttpRequest::new(method, url)
            .with_header("Content-Type", "application/json");
        for (name, value) in headers {
            request.headers.insert(name.clone(), value.clone());
        }
        request.body = payload.map(Value::to_string);
        request
    }

    /// Persists a request for later delivery.
    fn enqueue(
        &self,
        endpoint: &str,
        method: Method,
        payload: Option<Value>,
        headers: BTreeMap<String, String>,
    ) -> SyncResult<u64> {
        let mut entry = NewQueueEntry::new(endpoint, method);
        entry.payload = payload;
        entry.headers = headers;

        match self.store.queue_add(entry) {
            Ok(entry_id) => {
                info!("queued {} {} as entry {}", method, endpoint, entry_id);
                self.monitor.emit(&StatusEvent::Queued { entry_id });
                self.sink.notify(
                    "Saved offline - will sync when connection returns",
                    Severity::Sync,
                    DEFAULT_NOTIFICATION_DURATION,
                );
                Ok(entry_id)
            }
            Err(error) => {
                warn!("failed to queue {} {}: {}", method, endpoint, error);
                self.sink.notify(
                    "Could not save request for offline sync",
                    Severity::Error,
                    DEFAULT_NOTIFICATION_DURATION,
                );
                Err(error.into())
            }
        }
    }

    /// Spawns a drain pass on the captured runtime.
    fn spawn_drain(self: &Arc<Self>) {
        let Some(handle) = self.runtime.lock().clone() else {
            return;
        };
        let engine = Arc::clone(self);
        handle.spawn(async move {
            if let Err(error) = engine.sync_queue().await {
                warn!("drain pass failed: {}", error);
            }
        });
    }

    /// Starts the periodic drain timer, if not already running.
    fn start_timer(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let Some(handle) = self.runtime.lock().clone() else {
            return;
        };

        // The task holds a weak reference so a dropped engine does not
        // stay alive through its own timer.
        let weak = Arc::downgrade(self);
        let interval = self.config.drain_interval;
        *timer = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the online transition
            // already spawned its own drain pass.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { return };
                if let Err(error) = engine.sync_queue().await {
                    warn!("periodic drain failed: {}", error);
                }
            }
        }));
    }

    /// Stops the periodic drain timer.
    fn stop_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl<C: HttpClient> Drop for SyncEngine<C> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}
