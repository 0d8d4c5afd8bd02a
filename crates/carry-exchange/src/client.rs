//! Authenticated REST client.
//!
//! Every call: acquire rate budget → stamp with server-corrected time →
//! sign → send with a bounded timeout. Timeouts, 5xx, HTTP 429 and
//! retryable exchange codes are retried with capped exponential backoff;
//! exhaustion surfaces as [`ExchangeError::Transient`]. Any other non-zero
//! return code surfaces immediately as [`ExchangeError::Api`].
//!
//! A timeout, transport failure or 5xx leaves the attempt's outcome unknown:
//! the request may have been applied. [`ExchangeClient::post_signed_tracked`]
//! reports whether that happened so order placement can resolve it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use carry_telemetry::Metrics;

use crate::clock::ServerClock;
use crate::error::{ExchangeError, ExchangeResult};
use crate::rate_limiter::RateLimiter;
use crate::signer::RequestSigner;
use crate::transport::{DynTransport, HttpMethod, HttpRequest, TransportError};
use crate::wire::{ret_code, Endpoint, Envelope, ServerTimeResult};

/// Retry and timeout policy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl ClientConfig {
    /// Delay before retry number `attempt` (0-based): `min(max, base * 2^attempt)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max)
    }
}

/// Outcome of a single attempt that did not succeed.
enum AttemptFailure {
    /// Give up now.
    Fatal(ExchangeError),
    /// Worth another attempt.
    Retry {
        reason: &'static str,
        message: String,
        retry_after: Option<Duration>,
        resync_clock: bool,
        /// No definite answer was received.
        ambiguous: bool,
    },
}

/// Result of a call plus whether any attempt ended without a definite answer.
#[derive(Debug)]
pub struct Tracked<T> {
    pub result: ExchangeResult<T>,
    pub ambiguous: bool,
}

/// Signed, rate-limited, retrying REST client.
pub struct ExchangeClient {
    transport: DynTransport,
    limiter: Arc<RateLimiter>,
    clock: Arc<ServerClock>,
    signer: Option<RequestSigner>,
    config: ClientConfig,
}

impl ExchangeClient {
    pub fn new(
        transport: DynTransport,
        limiter: Arc<RateLimiter>,
        clock: Arc<ServerClock>,
        signer: Option<RequestSigner>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            clock,
            signer,
            config,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<ServerClock> {
        &self.clock
    }

    /// Unsigned GET.
    pub async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let value = self
            .execute(endpoint, HttpMethod::Get, encode_query(params), None, false)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Signed GET.
    pub async fn get_signed<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let value = self
            .execute(endpoint, HttpMethod::Get, encode_query(params), None, true)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Signed POST with a JSON body.
    pub async fn post_signed<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        body: &serde_json::Value,
    ) -> ExchangeResult<T> {
        let body = serde_json::to_string(body)?;
        let value = self
            .execute(endpoint, HttpMethod::Post, String::new(), Some(body), true)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Signed POST that also reports whether an earlier attempt may have
    /// been applied by the venue.
    pub async fn post_signed_tracked<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        body: &serde_json::Value,
    ) -> Tracked<T> {
        let body = match serde_json::to_string(body) {
            Ok(body) => body,
            Err(e) => {
                return Tracked {
                    result: Err(e.into()),
                    ambiguous: false,
                }
            }
        };
        let Tracked { result, ambiguous } = self
            .execute_tracked(endpoint, HttpMethod::Post, String::new(), Some(body), true)
            .await;
        Tracked {
            result: result.and_then(|value| Ok(serde_json::from_value(value)?)),
            ambiguous,
        }
    }

    /// Fetch server time (with retries) and update the clock offset.
    pub async fn sync_time(&self) -> ExchangeResult<i64> {
        let value = self
            .execute(Endpoint::ServerTime, HttpMethod::Get, String::new(), None, false)
            .await?;
        self.apply_server_time(value)
    }

    fn apply_server_time(&self, value: serde_json::Value) -> ExchangeResult<i64> {
        let time: ServerTimeResult = serde_json::from_value(value)?;
        let server_ms = time
            .millis()
            .ok_or_else(|| ExchangeError::Decode("unparseable server time".into()))?;
        Ok(self.clock.sync_with_server(server_ms))
    }

    /// Single attempt at a server-time sync, used mid-retry after a
    /// timestamp rejection.
    async fn resync_clock_once(&self) {
        let outcome = self
            .attempt(Endpoint::ServerTime, HttpMethod::Get, "", None, false)
            .await;
        match outcome {
            Ok(value) => {
                if let Err(e) = self.apply_server_time(value) {
                    warn!(error = %e, "Clock resync returned bad payload");
                }
            }
            Err(_) => warn!("Clock resync failed, retrying with previous offset"),
        }
    }

    async fn execute(
        &self,
        endpoint: Endpoint,
        method: HttpMethod,
        query: String,
        body: Option<String>,
        signed: bool,
    ) -> ExchangeResult<serde_json::Value> {
        self.execute_tracked(endpoint, method, query, body, signed)
            .await
            .result
    }

    async fn execute_tracked(
        &self,
        endpoint: Endpoint,
        method: HttpMethod,
        query: String,
        body: Option<String>,
        signed: bool,
    ) -> Tracked<serde_json::Value> {
        let attempts = self.config.max_retries + 1;
        let mut last_message = String::new();
        let mut ambiguous = false;

        for attempt in 0..attempts {
            match self
                .attempt(endpoint, method, &query, body.as_deref(), signed)
                .await
            {
                Ok(value) => {
                    Metrics::api_request(endpoint.label(), "ok");
                    return Tracked {
                        result: Ok(value),
                        ambiguous,
                    };
                }
                Err(AttemptFailure::Fatal(e)) => {
                    Metrics::api_request(endpoint.label(), "error");
                    return Tracked {
                        result: Err(e),
                        ambiguous,
                    };
                }
                Err(AttemptFailure::Retry {
                    reason,
                    message,
                    retry_after,
                    resync_clock,
                    ambiguous: unanswered,
                }) => {
                    Metrics::api_retry(endpoint.label(), reason);
                    last_message = message;
                    ambiguous |= unanswered;
                    if attempt + 1 >= attempts {
                        break;
                    }
                    let delay = retry_after.unwrap_or_else(|| self.config.backoff(attempt));
                    warn!(
                        endpoint = endpoint.path(),
                        attempt = attempt + 1,
                        reason,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_message,
                        "Retrying API request"
                    );
                    if resync_clock {
                        self.resync_clock_once().await;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Metrics::api_request(endpoint.label(), "exhausted");
        Tracked {
            result: Err(ExchangeError::Transient {
                attempts,
                message: last_message,
            }),
            ambiguous,
        }
    }

    async fn attempt(
        &self,
        endpoint: Endpoint,
        method: HttpMethod,
        query: &str,
        body: Option<&str>,
        signed: bool,
    ) -> Result<serde_json::Value, AttemptFailure> {
        self.limiter
            .acquire(endpoint.weight())
            .await
            .map_err(AttemptFailure::Fatal)?;

        let headers = if signed {
            let signer = self.signer.as_ref().ok_or_else(|| {
                AttemptFailure::Fatal(ExchangeError::Credentials(
                    "signed request without credentials".into(),
                ))
            })?;
            let payload = match method {
                HttpMethod::Get => query,
                HttpMethod::Post => body.unwrap_or_default(),
            };
            signer.headers(self.clock.timestamp_ms(), payload)
        } else {
            Vec::new()
        };

        let request = HttpRequest {
            method,
            path: endpoint.path().to_string(),
            query: query.to_string(),
            body: body.map(str::to_string),
            headers,
        };

        debug!(endpoint = endpoint.path(), query, "API request");

        let response =
            match tokio::time::timeout(self.config.request_timeout, self.transport.send(request))
                .await
            {
                Err(_) | Ok(Err(TransportError::Timeout)) => {
                    return Err(AttemptFailure::Retry {
                        reason: "timeout",
                        message: format!("{} timed out", endpoint.path()),
                        retry_after: None,
                        resync_clock: false,
                        ambiguous: true,
                    })
                }
                Ok(Err(e)) => {
                    return Err(AttemptFailure::Retry {
                        reason: "transport",
                        message: e.to_string(),
                        retry_after: None,
                        resync_clock: false,
                        ambiguous: true,
                    })
                }
                Ok(Ok(response)) => response,
            };

        if response.status == 429 {
            return Err(AttemptFailure::Retry {
                reason: "http_429",
                message: "HTTP 429 Too Many Requests".into(),
                retry_after: response.retry_after,
                resync_clock: false,
                ambiguous: false,
            });
        }
        if response.status >= 500 {
            return Err(AttemptFailure::Retry {
                reason: "http_5xx",
                message: format!("HTTP {}: {}", response.status, truncate(&response.body)),
                retry_after: None,
                resync_clock: false,
                ambiguous: true,
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(AttemptFailure::Fatal(ExchangeError::HttpClient(format!(
                "HTTP {}: {}",
                response.status,
                truncate(&response.body)
            ))));
        }

        let envelope: Envelope = serde_json::from_str(&response.body)
            .map_err(|e| AttemptFailure::Fatal(ExchangeError::Decode(e.to_string())))?;

        match envelope.ret_code {
            ret_code::OK => Ok(envelope.result),
            code if ret_code::is_retryable(code) => Err(AttemptFailure::Retry {
                reason: "ret_code",
                message: format!("retCode {code}: {}", envelope.ret_msg),
                retry_after: None,
                resync_clock: code == ret_code::TIMESTAMP_EXPIRED,
                ambiguous: code == ret_code::SERVER_ERROR,
            }),
            code => Err(AttemptFailure::Fatal(ExchangeError::Api {
                code,
                message: envelope.ret_msg,
            })),
        }
    }
}

/// `k1=v1&k2=v2` in the given order. This exact string is signed and sent.
fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
