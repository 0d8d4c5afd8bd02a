//! Prometheus metrics for the carry bot.
//!
//! Covers the REST client (requests, retries, limiter waits), the scanner,
//! and the position lifecycle (open count, transitions, faults, realized PnL).
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A failure means a
//! duplicate metric name, which is a programming error that should crash at
//! startup. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter_vec,
    register_int_gauge, CounterVec, Histogram, HistogramVec, IntCounterVec, IntGauge,
};

// =============================================================================
// REST client
// =============================================================================

/// REST requests by final outcome.
/// Labels: endpoint, outcome (ok/error/exhausted)
pub static API_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "carry_api_requests_total",
        "REST requests by endpoint and final outcome",
        &["endpoint", "outcome"]
    )
    .unwrap()
});

/// REST retries.
/// Labels: endpoint, reason (timeout/http_5xx/http_429/ret_code)
pub static API_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "carry_api_retries_total",
        "REST retry attempts by endpoint and reason",
        &["endpoint", "reason"]
    )
    .unwrap()
});

/// Time spent waiting on the rate limiter.
pub static RATE_LIMIT_WAIT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "carry_rate_limit_wait_ms",
        "Time spent waiting for rate limiter tokens in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

// =============================================================================
// Scanner
// =============================================================================

/// Candidates returned by the last scan.
pub static SCAN_CANDIDATES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "carry_scan_candidates",
        "Candidates passing thresholds in the last scan"
    )
    .unwrap()
});

// =============================================================================
// Position lifecycle
// =============================================================================

/// Currently open positions.
pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("carry_open_positions", "Currently open positions").unwrap());

/// Lifecycle transitions.
/// Labels: kind (opened/open_aborted/closed/critical_fault)
pub static LIFECYCLE_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "carry_lifecycle_transitions_total",
        "Position lifecycle transitions by kind",
        &["kind"]
    )
    .unwrap()
});

/// Critical faults (one leg filled, the other failed).
pub static CRITICAL_FAULTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "carry_critical_faults_total",
        "Positions left with a single hedged leg",
        &["symbol"]
    )
    .unwrap()
});

/// Realized net PnL in quote currency.
pub static REALIZED_PNL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_realized_pnl_quote",
        "Sum of realized net PnL by exit mode (losses recorded separately)",
        &["exit_mode", "sign"]
    )
    .unwrap()
});

/// Holding time of closed positions in hours.
pub static HOLDING_HOURS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "carry_holding_hours",
        "Holding time of closed positions in hours",
        &["exit_mode"],
        vec![1.0, 4.0, 8.0, 24.0, 48.0, 96.0, 168.0, 336.0]
    )
    .unwrap()
});

/// Metrics helper for recording values.
pub struct Metrics;

impl Metrics {
    // =========================================================================
    // REST client
    // =========================================================================

    /// Record a finished REST request.
    pub fn api_request(endpoint: &str, outcome: &str) {
        API_REQUESTS_TOTAL
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    /// Record one retry.
    pub fn api_retry(endpoint: &str, reason: &str) {
        API_RETRIES_TOTAL
            .with_label_values(&[endpoint, reason])
            .inc();
    }

    /// Record a rate limiter wait.
    pub fn rate_limit_wait(waited_ms: f64) {
        RATE_LIMIT_WAIT_MS.observe(waited_ms);
    }

    // =========================================================================
    // Scanner
    // =========================================================================

    pub fn scan_candidates(count: usize) {
        SCAN_CANDIDATES.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    // =========================================================================
    // Position lifecycle
    // =========================================================================

    /// Set the open position gauge.
    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn lifecycle_transition(kind: &str) {
        LIFECYCLE_TRANSITIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn critical_fault(symbol: &str) {
        CRITICAL_FAULTS_TOTAL.with_label_values(&[symbol]).inc();
        LIFECYCLE_TRANSITIONS_TOTAL
            .with_label_values(&["critical_fault"])
            .inc();
    }

    /// Record a closed position's realized net PnL and holding time.
    ///
    /// Counters only go up, so gains and losses are tracked under separate
    /// `sign` labels.
    pub fn position_closed(exit_mode: &str, net_pnl: f64, holding_hours: f64) {
        let sign = if net_pnl < 0.0 { "loss" } else { "gain" };
        REALIZED_PNL_TOTAL
            .with_label_values(&[exit_mode, sign])
            .inc_by(net_pnl.abs());
        HOLDING_HOURS
            .with_label_values(&[exit_mode])
            .observe(holding_hours);
        LIFECYCLE_TRANSITIONS_TOTAL
            .with_label_values(&["closed"])
            .inc();
    }
}
