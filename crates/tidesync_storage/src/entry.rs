//! Persisted record types for the three store collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP method of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read-only request. Never queued for replay.
    Get,
    /// Create.
    Post,
    /// Update.
    Put,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the canonical uppercase method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true for methods that change server state.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized HTTP method name.
#[derive(Debug, Error)]
#[error("unknown HTTP method: {0}")]
pub struct UnknownMethod(pub String);

/// A persisted record of one mutating request awaiting successful delivery.
///
/// Entries are created when a mutating request fails, mutated on each failed
/// retry (`retry_count`, `last_retry_at`), and destroyed on a successful
/// retry or a definitive client-error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique store-assigned id. Monotonic within a store.
    pub id: u64,
    /// Endpoint path, relative to the configured path prefix.
    pub endpoint: String,
    /// HTTP method.
    pub method: Method,
    /// Request payload, if any.
    pub payload: Option<Value>,
    /// Caller-supplied headers.
    pub headers: BTreeMap<String, String>,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
    /// Number of failed retries so far. Clamped to the configured maximum.
    pub retry_count: u32,
    /// When the entry was last retried, if ever.
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// Input record for [`queue_add`](crate::DurableStore::queue_add).
///
/// The store assigns `id` and `created_at` at insert time.
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    /// Endpoint path.
    pub endpoint: String,
    /// HTTP method.
    pub method: Method,
    /// Request payload, if any.
    pub payload: Option<Value>,
    /// Caller-supplied headers.
    pub headers: BTreeMap<String, String>,
}

impl NewQueueEntry {
    /// Creates a new entry for the given endpoint and method.
    pub fn new(endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload: None,
            headers: BTreeMap::new(),
        }
    }

    /// Sets the request payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A saved copy of in-progress form input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    /// The owning form's identity.
    pub form_id: String,
    /// Field name to current value.
    pub fields: BTreeMap<String, String>,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
}
