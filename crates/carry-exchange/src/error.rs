//! Exchange access error types.

use thiserror::Error;

/// Errors surfaced by the exchange access layer.
///
/// Transport-level and rate-limit failures are retried inside
/// [`crate::ExchangeClient`]; only exhaustion reaches callers as `Transient`.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Retryable failure that persisted through every attempt.
    #[error("Transient API failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// Non-retryable business error reported by the exchange.
    #[error("Exchange error {code}: {message}")]
    Api { code: i64, message: String },

    /// Order refused by the exchange or not filled.
    #[error("Order rejected: {reason}")]
    OrderRejected { code: Option<i64>, reason: String },

    /// Order may be live but its fill could not be confirmed; exposure unknown.
    /// Carries the venue order id, or the link id when no order id is known.
    #[error("Fill not confirmed for order {order_id}")]
    FillUnconfirmed { order_id: String },

    /// Quantity could not be rounded to a valid instrument step.
    #[error("Precision error for {symbol}: {message}")]
    Precision { symbol: String, message: String },

    /// Instrument, ticker or balance missing from a response.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed response body.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Non-retryable HTTP failure (4xx other than 429).
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Missing or invalid credentials: {0}")]
    Credentials(String),

    #[error("Request weight {weight} exceeds limiter capacity {capacity}")]
    WeightExceedsCapacity { weight: u32, capacity: u32 },

    #[error("Rate limiter closed")]
    RateLimiterClosed,
}

impl ExchangeError {
    /// Exchange error code, when the exchange supplied one.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            Self::OrderRejected { code, .. } => *code,
            _ => None,
        }
    }

    /// Precision failures are raised before any order is sent.
    #[must_use]
    pub fn is_precision(&self) -> bool {
        matches!(self, Self::Precision { .. })
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
