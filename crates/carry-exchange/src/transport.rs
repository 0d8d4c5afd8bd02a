//! HTTP transport trait for REST requests.
//!
//! Separates request building and signing (in [`crate::ExchangeClient`])
//! from the wire, so the client can be exercised against a scripted
//! transport in tests.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Fully built request. `query` and `body` are sent byte-for-byte as signed.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    pub body: Option<String>,
    pub headers: Vec<(&'static str, String)>,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, if present.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }
}

/// Transport-level failure. All variants are treated as transient.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends one HTTP request.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Arc wrapper for Transport trait objects.
pub type DynTransport = Arc<dyn Transport>;

// ============================================================================
// reqwest
// ============================================================================

/// Production transport over `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            let url = if request.query.is_empty() {
                format!("{}{}", self.base_url, request.path)
            } else {
                format!("{}{}?{}", self.base_url, request.path, request.query)
            };

            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&url),
                HttpMethod::Post => self
                    .client
                    .post(&url)
                    .header("Content-Type", "application/json"),
            };
            for (name, value) in &request.headers {
                builder = builder.header(*name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

            Ok(HttpResponse {
                status,
                body,
                retry_after,
            })
        })
    }
}

// ============================================================================
// Scripted mock
// ============================================================================

type Scripted = Result<HttpResponse, TransportError>;

/// Scripted transport for tests.
///
/// Responses are queued per route and consumed in order; once a queue is
/// down to its last entry that entry repeats. A route is either a path or
/// `path?query`; the exact `path?query` route wins when both exist.
/// Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `path`.
    pub fn push(&self, path: &str, response: Scripted) {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a response for one exact query on `path`.
    pub fn push_query(&self, path: &str, query: &str, response: Scripted) {
        self.push(&format!("{path}?{query}"), response);
    }

    /// Queue a 200 response with a successful envelope around `result`.
    pub fn push_ok(&self, path: &str, result: serde_json::Value) {
        self.push(path, Ok(Self::envelope(result)));
    }

    /// Successful envelope around `result`.
    pub fn envelope(result: serde_json::Value) -> HttpResponse {
        let body = serde_json::json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": result,
            "time": 1_700_000_000_000_i64,
        });
        HttpResponse::ok(body.to_string())
    }

    /// Queue a 200 response carrying an exchange error code.
    pub fn push_ret_code(&self, path: &str, code: i64, msg: &str) {
        let body = serde_json::json!({
            "retCode": code,
            "retMsg": msg,
            "result": {},
        });
        self.push(path, Ok(HttpResponse::ok(body.to_string())));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            let path = request.path.clone();
            let exact = format!("{}?{}", request.path, request.query);
            self.requests.lock().push(request);

            let mut routes = self.routes.lock();
            let key = if routes.contains_key(&exact) { exact } else { path.clone() };
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue
                    .pop_front()
                    .unwrap_or_else(|| Ok(HttpResponse::status(404, "empty"))),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Ok(HttpResponse::status(404, "empty"))),
                None => Ok(HttpResponse::status(404, format!("no route for {path}"))),
            }
        })
    }
}
