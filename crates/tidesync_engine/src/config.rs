//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the offline request engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server base URL, e.g. `https://orb.example.com`.
    pub base_url: String,
    /// Path prefix joined to every caller-supplied endpoint.
    pub path_prefix: String,
    /// Health endpoint path used by the active probe.
    pub health_path: String,
    /// Timeout for an individual request.
    pub request_timeout: Duration,
    /// Timeout for the active connectivity probe.
    pub probe_timeout: Duration,
    /// Interval of the periodic drain timer while online.
    pub drain_interval: Duration,
    /// Debounce window for form auto-save.
    pub debounce: Duration,
    /// Retry-count ceiling recorded on queue entries.
    pub max_retries: u32,
    /// Backoff schedule for failed retries.
    pub backoff: BackoffSchedule,
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path_prefix: "/api".into(),
            health_path: "/api/health".into(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            drain_interval: Duration::from_secs(30),
            debounce: Duration::from_secs(1),
            max_retries: 6,
            backoff: BackoffSchedule::default(),
        }
    }

    /// Sets the path prefix.
    #[must_use]
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// Sets the health endpoint path.
    #[must_use]
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the periodic drain interval.
    #[must_use]
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Sets the form auto-save debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the retry-count ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// The table mapping retry attempt number to wait duration.
///
/// Delays are indexed by an entry's recorded retry count and clamp to the
/// table's last entry once the count runs past the end - an entry that
/// keeps failing waits the ceiling delay on every further pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Creates a schedule from a delay table.
    ///
    /// An empty table falls back to the default schedule.
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self::default();
        }
        Self { delays }
    }

    /// Returns the delay to wait before retrying an entry with the given
    /// retry count.
    ///
    /// The drain loop skips the wait entirely for entries that have never
    /// been retried; this lookup is only consulted for `retry_count > 0`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = (retry_count as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// Returns the ceiling delay (the table's last entry).
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        *self.delays.last().unwrap_or(&Duration::ZERO)
    }
}

impl Default for BackoffSchedule {
    /// Delays growing geometrically from 1s to a 30s ceiling.
    fn default() -> Self {
        Self {
            delays: [1, 2, 4, 8, 16, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}
