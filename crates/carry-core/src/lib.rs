//! Core domain types for the spot/futures carry bot.
//!
//! This crate provides fundamental types used throughout the engine:
//! - `Symbol`, `Category`, `OrderSide`: market identifiers and enums
//! - `Price`, `Size`: precision-safe numeric types with step rounding
//! - `MarketQuote`: combined spot/futures top of book plus funding
//! - `Position`, `ClosedPosition`, `BlacklistEntry`: persisted records
//! - `EntryThresholds`: admission rule for new positions

pub mod decimal;
pub mod error;
pub mod position;
pub mod thresholds;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use position::{
    BlacklistEntry, ClosedPosition, ExitMode, MonitorCounters, Position, SpreadDirection,
    TradeStatistics, SPREAD_CHANGE_EPSILON,
};
pub use thresholds::EntryThresholds;
pub use types::{Bbo, Category, MarketQuote, OrderSide, Symbol};
