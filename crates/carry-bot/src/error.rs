//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] carry_exchange::ExchangeError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] carry_position::LifecycleError),

    #[error("Store error: {0}")]
    Store(#[from] carry_position::StoreError),

    #[error("Scanner error: {0}")]
    Scanner(#[from] carry_scanner::ScannerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] carry_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] carry_persistence::PersistenceError),

    #[error("Notification delivery failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for AppError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
