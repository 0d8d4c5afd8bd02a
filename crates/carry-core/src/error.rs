//! Error types for carry-core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Quantity {value} rounds to {rounded}, below minimum {min}")]
    BelowMinimum {
        value: Decimal,
        rounded: Decimal,
        min: Decimal,
    },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
