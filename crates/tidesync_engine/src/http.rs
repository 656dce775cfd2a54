//! HTTP client abstraction.
//!
//! The engine never talks to a concrete HTTP library. Implement
//! [`HttpClient`] over whichever transport the host uses (reqwest, hyper,
//! a loopback for tests); the engine only needs request-out, response-in.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tidesync_storage::Method;

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Serialized request body, if any.
    pub body: Option<String>,
}

impl HttpRequest {
    /// Creates a request with no headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Creates an empty 200 response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(200, Vec::new())
    }

    /// Creates a response with a JSON body.
    #[must_use]
    pub fn json_body(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string().into_bytes())
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 4xx statuses.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Returns true for 5xx statuses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Parses the body as JSON. An empty body parses as `null`.
    pub fn json(&self) -> serde_json::Result<Value> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }
}

/// A client that can deliver HTTP requests.
///
/// `Err` means a transport failure: no response was received at all. A
/// response with a failure status is still an `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response, or a transport failure
    /// message.
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

impl<T: HttpClient> HttpClient for std::sync::Arc<T> {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, String>> + Send {
        self.as_ref().send(request)
    }
}

/// A scripted client for testing.
///
/// Responses are consumed front-to-back from a script; when the script runs
/// dry, every call fails with a transport error. All sent requests are
/// recorded.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl MockHttpClient {
    /// Creates a mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response to the script.
    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Appends a transport failure to the script.
    pub fn push_transport_failure(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    /// Makes every send sleep before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns all recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of sends so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().push(request);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_status_classes() {
        assert!(HttpResponse::new(204, Vec::new()).is_ok());
        assert!(HttpResponse::new(404, Vec::new()).is_client_error());
        assert!(HttpResponse::new(503, Vec::new()).is_server_error());
        assert!(!HttpResponse::new(404, Vec::new()).is_server_error());
    }

    #[test]
    fn json_parsing() {
        let response = HttpResponse::json_body(200, &json!({"ok": true}));
        assert_eq!(response.json().unwrap(), json!({"ok": true}));

        // An empty body is null, not an error.
        assert_eq!(HttpResponse::ok().json().unwrap(), Value::Null);

        assert!(HttpResponse::new(200, b"not json".to_vec()).json().is_err());
    }

    #[test]
    fn request_builder() {
        let request = HttpRequest::get("https://example.com/api/health")
            .with_header("Cache-Control", "no-store");
        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.headers.get("Cache-Control").map(String::as_str),
            Some("no-store")
        );
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn mock_plays_script_in_order() {
        let client = MockHttpClient::new();
        client.push_response(HttpResponse::ok());
        client.push_transport_failure("connection refused");

        let first = client.send(HttpRequest::get("http://x/1")).await;
        assert!(first.unwrap().is_ok());

        let second = client.send(HttpRequest::get("http://x/2")).await;
        assert_eq!(second.unwrap_err(), "connection refused");

        // Script exhausted: transport failure.
        let third = client.send(HttpRequest::get("http://x/3")).await;
        assert!(third.is_err());

        let urls: Vec<_> = client.requests().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, ["http://x/1", "http://x/2", "http://x/3"]);
    }
}
