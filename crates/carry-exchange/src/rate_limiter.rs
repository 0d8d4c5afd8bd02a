//! Rate limiting for REST requests.
//!
//! A sliding one-second log of admitted requests shared by every API call.
//! Each entry carries the request's endpoint weight, so the log bounds both
//! the request count and the summed weight over any rolling window. Entries
//! expire individually one second after admission.
//!
//! Waiters are served in arrival order: the head of the queue holds a
//! turn lock while it sleeps, so a heavy request is never starved by a
//! stream of light ones.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use carry_telemetry::Metrics;

use crate::error::{ExchangeError, ExchangeResult};

/// Length of the rolling window both limits apply to.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per rolling second.
    pub max_requests_per_sec: u32,
    /// Weight admitted per rolling second.
    pub max_weight_per_sec: u32,
}

impl RateLimiterConfig {
    pub fn per_second(max_requests_per_sec: u32, max_weight_per_sec: u32) -> Self {
        Self {
            max_requests_per_sec,
            max_weight_per_sec,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(50, 300)
    }
}

/// Requests admitted within the last [`RATE_WINDOW`].
#[derive(Debug)]
struct WindowLog {
    max_requests: usize,
    max_weight: u64,
    /// Admission time and weight, oldest first.
    entries: VecDeque<(Instant, u32)>,
    weight_in_window: u64,
}

impl WindowLog {
    fn new(max_requests: u32, max_weight: u32) -> Self {
        let max_requests = max_requests.max(1) as usize;
        Self {
            max_requests,
            max_weight: u64::from(max_weight.max(1)),
            entries: VecDeque::with_capacity(max_requests),
            weight_in_window: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, weight)) = self.entries.front() {
            if now.saturating_duration_since(at) < RATE_WINDOW {
                break;
            }
            self.entries.pop_front();
            self.weight_in_window -= u64::from(weight);
        }
    }

    /// Time until a request of `weight` fits both limits (zero if it fits now).
    fn wait_for(&self, weight: u32, now: Instant) -> Duration {
        let mut requests = self.entries.len() + 1;
        let mut total = self.weight_in_window + u64::from(weight);
        if requests <= self.max_requests && total <= self.max_weight {
            return Duration::ZERO;
        }
        for &(at, w) in &self.entries {
            requests -= 1;
            total -= u64::from(w);
            if requests <= self.max_requests && total <= self.max_weight {
                return (at + RATE_WINDOW).saturating_duration_since(now);
            }
        }
        // Unreachable while weight <= max_weight: an empty log always fits.
        RATE_WINDOW
    }

    fn record(&mut self, weight: u32, now: Instant) {
        self.entries.push_back((now, weight));
        self.weight_in_window += u64::from(weight);
    }
}

#[derive(Debug)]
struct LimiterState {
    window: WindowLog,
    total_requests: u64,
    total_weight: u64,
    throttled: u64,
}

/// Usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_weight: u64,
    /// Acquisitions that had to wait for the window to clear.
    pub throttled: u64,
}

/// Process-wide rolling-window gate.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
    /// FIFO turn: only the head waiter polls the buckets.
    turn: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window: WindowLog::new(config.max_requests_per_sec, config.max_weight_per_sec),
                total_requests: 0,
                total_weight: 0,
                throttled: 0,
            }),
            turn: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Wait for one request slot and `weight` units, then consume them.
    ///
    /// # Errors
    /// - `RateLimiterClosed` once [`close`](Self::close) has been called
    /// - `WeightExceedsCapacity` if the weight could never be satisfied
    pub async fn acquire(&self, weight: u32) -> ExchangeResult<()> {
        if weight > self.config.max_weight_per_sec.max(1) {
            return Err(ExchangeError::WeightExceedsCapacity {
                weight,
                capacity: self.config.max_weight_per_sec,
            });
        }
        if self.shutdown.is_cancelled() {
            return Err(ExchangeError::RateLimiterClosed);
        }

        let _turn = tokio::select! {
            guard = self.turn.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(ExchangeError::RateLimiterClosed),
        };

        let started = Instant::now();
        let mut waited = false;

        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.window.prune(now);

                let wait = state.window.wait_for(weight, now);
                if wait.is_zero() {
                    state.window.record(weight, now);
                    state.total_requests += 1;
                    state.total_weight += u64::from(weight);
                    if waited {
                        state.throttled += 1;
                    }
                    None
                } else {
                    Some(wait)
                }
            };

            let Some(wait) = wait else {
                if waited {
                    let waited_ms = started.elapsed().as_secs_f64() * 1000.0;
                    Metrics::rate_limit_wait(waited_ms);
                    debug!(weight, waited_ms, "Rate limit wait finished");
                }
                return Ok(());
            };

            waited = true;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.cancelled() => return Err(ExchangeError::RateLimiterClosed),
            }
        }
    }

    /// Reject current and future waiters.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            warn!("Rate limiter closed");
        }
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock();
        RateLimiterStats {
            total_requests: state.total_requests,
            total_weight: state.total_weight,
            throttled: state.throttled,
        }
    }
}
