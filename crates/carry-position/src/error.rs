//! Position lifecycle error types.

use carry_exchange::ExchangeError;
use thiserror::Error;

/// Failures of the position and blacklist stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Position already open: {0}")]
    Duplicate(String),

    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a lifecycle operation that did not complete.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Concurrent position limit reached ({max})")]
    CapacityReached { max: usize },

    #[error("Position already open or in flight: {0}")]
    AlreadyActive(String),

    #[error("Symbol is blacklisted: {0}")]
    Blacklisted(String),

    /// Live quote no longer meets entry thresholds. Nothing was sent.
    #[error("Entry no longer valid for {symbol}: {reason}")]
    EntryInvalidated { symbol: String, reason: String },

    /// Futures leg (or a pre-trade step) failed. Nothing is held.
    #[error("Open aborted for {symbol}: {source}")]
    OpenAborted {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// Spot sale failed before anything was committed; retried next interval.
    #[error("Close failed for {symbol}: {source}")]
    CloseFailed {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// Exchange exposure no longer matches stored state.
    #[error("Critical fault on {symbol}: {message}")]
    CriticalFault { symbol: String, message: String },

    #[error("No open position for {0}")]
    NotOpen(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl LifecycleError {
    /// Monitoring for the symbol must stop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CriticalFault { .. } | Self::NotOpen(_))
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
