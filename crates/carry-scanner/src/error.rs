//! Scanner error types.

use carry_exchange::ExchangeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Market snapshot unavailable: {0}")]
    Snapshot(#[from] ExchangeError),
}

pub type ScannerResult<T> = Result<T, ScannerError>;
