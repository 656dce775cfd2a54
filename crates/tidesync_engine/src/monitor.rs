//! Connectivity state machine.

use crate::feed::{StatusEvent, StatusFeed, Subscription};
use crate::http::{HttpClient, HttpRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of the connectivity flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Whether the network is believed to be available.
    pub online: bool,
    /// Whether a drain pass is currently in flight.
    pub syncing: bool,
}

/// Tracks online/offline state and fans out status events.
///
/// One monitor exists per engine; construct it at startup and pass it by
/// reference. The host's network-event wiring drives [`set_online`]; the
/// engine reacts to the resulting [`StatusEvent`]s and reuses the feed for
/// its own `queued`/`synced` events, so callers observe everything through
/// one [`on_status_change`] registration.
///
/// [`set_online`]: ConnectivityMonitor::set_online
/// [`on_status_change`]: ConnectivityMonitor::on_status_change
pub struct ConnectivityMonitor {
    online: AtomicBool,
    syncing: AtomicBool,
    feed: StatusFeed,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the host's reported network status.
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            syncing: AtomicBool::new(false),
            feed: StatusFeed::new(),
        }
    }

    /// Returns whether the network is believed available.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns whether a drain pass is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of both flags.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        ConnectivityState {
            online: self.is_online(),
            syncing: self.is_syncing(),
        }
    }

    /// Records a network-available or network-unavailable signal.
    ///
    /// Emits `online`/`offline` to listeners only on an actual transition;
    /// repeating the current state is silent.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        info!("connectivity changed: {}", if online { "online" } else { "offline" });
        self.feed.emit(if online {
            &StatusEvent::Online
        } else {
            &StatusEvent::Offline
        });
    }

    /// Registers a status listener for `online`, `offline`, `queued`, and
    /// `synced` events. Returns an unregistration handle.
    pub fn on_status_change(
        &self,
        listener: impl Fn(&StatusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.feed.subscribe(listener)
    }

    /// Emits an event to all status listeners.
    pub fn emit(&self, event: &StatusEvent) {
        self.feed.emit(event);
    }

    /// Claims the drain-in-flight flag.
    ///
    /// Returns false if a drain pass is already running; the caller must
    /// skip, not wait.
    pub fn begin_drain(&self) -> bool {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the drain-in-flight flag.
    pub fn end_drain(&self) {
        self.syncing.store(false, Ordering::SeqCst);
    }

    /// Actively probes the health endpoint.
    ///
    /// Returns reachability independent of the cached state and never
    /// mutates it - for callers who distrust the host's network signal.
    /// The probe is abandoned once `timeout` elapses.
    pub async fn verify_connectivity<C: HttpClient>(
        &self,
        client: &C,
        health_url: &str,
        timeout: Duration,
    ) -> bool {
        let request = HttpRequest::get(health_url).with_header("Cache-Control", "no-store");
        match tokio::time::timeout(timeout, client.send(request)).await {
            Ok(Ok(response)) => response.is_ok(),
            Ok(Err(error)) => {
                debug!("connectivity probe failed: {}", error);
                false
            }
            Err(_) => {
                debug!("connectivity probe timed out after {:?}", timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockHttpClient};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn transitions_emit_once() {
        let monitor = ConnectivityMonitor::new(true);
        let events = Arc::new(Mutex::new(Vec::new()));

        let events_inner = Arc::clone(&events);
        let _subscription =
            monitor.on_status_change(move |event| events_inner.lock().push(event.name()));

        monitor.set_online(true); // no transition
        monitor.set_online(false);
        monitor.set_online(false); // no transition
        monitor.set_online(true);

        assert_eq!(events.lock().as_slice(), ["offline", "online"]);
        assert!(monitor.is_online());
    }

    #[test]
    fn drain_flag_is_exclusive() {
        let monitor = ConnectivityMonitor::new(true);

        assert!(monitor.begin_drain());
        assert!(monitor.is_syncing());
        // A second claim loses while the first is in flight.
        assert!(!monitor.begin_drain());

        monitor.end_drain();
        assert!(!monitor.is_syncing());
        assert!(monitor.begin_drain());
    }

    #[test]
    fn state_snapshot() {
        let monitor = ConnectivityMonitor::new(false);
        assert_eq!(
            monitor.state(),
            ConnectivityState {
                online: false,
                syncing: false
            }
        );

        monitor.set_online(true);
        monitor.begin_drain();
        assert_eq!(
            monitor.state(),
            ConnectivityState {
                online: true,
                syncing: true
            }
        );
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let monitor = ConnectivityMonitor::new(false);
        let client = MockHttpClient::new();
        client.push_response(HttpResponse::ok());

        let reachable = monitor
            .verify_connectivity(&client, "http://x/api/health", Duration::from_secs(5))
            .await;
        assert!(reachable);

        // The probe must bypass caches and never touch the cached state.
        let request = &client.requests()[0];
        assert_eq!(
            request.headers.get("Cache-Control").map(String::as_str),
            Some("no-store")
        );
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn probe_false_on_transport_failure_and_error_status() {
        let monitor = ConnectivityMonitor::new(true);
        let client = MockHttpClient::new();
        client.push_transport_failure("unreachable");
        client.push_response(HttpResponse::new(500, Vec::new()));

        for _ in 0..2 {
            let reachable = monitor
                .verify_connectivity(&client, "http://x/api/health", Duration::from_secs(5))
                .await;
            assert!(!reachable);
        }
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_abandoned_on_timeout() {
        let monitor = ConnectivityMonitor::new(true);
        let client = MockHttpClient::new();
        client.set_latency(Duration::from_secs(60));
        client.push_response(HttpResponse::ok());

        let reachable = monitor
            .verify_connectivity(&client, "http://x/api/health", Duration::from_secs(5))
            .await;
        assert!(!reachable);
    }
}
