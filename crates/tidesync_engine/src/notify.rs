//! User-facing notification sink.

use std::time::Duration;
use tracing::{error, info, warn};

/// Default display duration for notifications.
pub const DEFAULT_NOTIFICATION_DURATION: Duration = Duration::from_secs(3);

/// Severity category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// An operation completed.
    Success,
    /// An operation failed.
    Error,
    /// Something needs attention but nothing failed.
    Warning,
    /// Neutral information.
    Info,
    /// Offline-queue and drain activity.
    Sync,
}

impl Severity {
    /// Returns the lowercase category name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Sync => "sync",
        }
    }
}

/// A sink for user-facing notifications (toasts, badges).
///
/// The engine reports queue and drain activity here. Implementations must
/// be safe to call when no visual surface is mounted; [`LogSink`] is the
/// no-surface default.
pub trait NotificationSink: Send + Sync {
    /// Shows a notification for the given duration.
    fn notify(&self, message: &str, severity: Severity, duration: Duration);
}

/// The default sink: routes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, message: &str, severity: Severity, _duration: Duration) {
        match severity {
            Severity::Error => error!("[{}] {}", severity.as_str(), message),
            Severity::Warning => warn!("[{}] {}", severity.as_str(), message),
            _ => info!("[{}] {}", severity.as_str(), message),
        }
    }
}
