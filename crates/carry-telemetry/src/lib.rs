//! Prometheus metrics and structured logging for the carry bot.
//!
//! - Structured logging via `tracing` (JSON in production)
//! - Prometheus counters, gauges and histograms behind [`Metrics`]
//! - `/metrics` and `/health` endpoints served with axum

pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use server::{create_router, encode_metrics, run_metrics_server};
