//! Position records shared by the engine and its stores.
//!
//! - `Position`: an open hedged pair (long spot, short futures)
//! - `ClosedPosition`: immutable history record with realized PnL
//! - `BlacklistEntry`: symbol excluded from scanning
//! - `TradeStatistics`: aggregate over closed positions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Price, Size, Symbol};

/// Band (in percentage points) inside which a spread change counts as unchanged.
pub const SPREAD_CHANGE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Per-interval monitoring counters persisted with an open position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCounters {
    /// Intervals observed since open.
    pub funding_observations: u32,
    /// Consecutive intervals with funding at or below the tracking threshold.
    pub low_funding_streak: u32,
    /// Soft-close mode armed.
    pub soft_close_armed: bool,
}

/// Open hedged position. At most one per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub spot_entry_price: Price,
    pub futures_entry_price: Price,
    pub spot_qty: Size,
    pub futures_qty: Size,
    /// Entry spread in percent, computed from the fill prices.
    pub entry_spread_pct: Decimal,
    /// Funding rate observed at open, in percent.
    pub entry_funding_rate_pct: Decimal,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: MonitorCounters,
}

impl Position {
    /// Mode the monitor is currently evaluating under.
    #[must_use]
    pub fn exit_mode(&self) -> ExitMode {
        if self.counters.soft_close_armed {
            ExitMode::SoftClose
        } else {
            ExitMode::Normal
        }
    }

    /// Average of the two legs' entry notionals.
    #[must_use]
    pub fn entry_notional(&self) -> Decimal {
        (self.spot_qty * self.spot_entry_price + self.futures_qty * self.futures_entry_price)
            / Decimal::TWO
    }
}

/// Close rule that triggered an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    Normal,
    SoftClose,
}

impl fmt::Display for ExitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::SoftClose => write!(f, "soft_close"),
        }
    }
}

/// Direction of spread movement between entry and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadDirection {
    Narrowed,
    Widened,
    Unchanged,
}

impl SpreadDirection {
    /// Classify `exit - entry` using a ±0.01 pp band.
    pub fn classify(change_pct: Decimal) -> Self {
        if change_pct < -SPREAD_CHANGE_EPSILON {
            Self::Narrowed
        } else if change_pct > SPREAD_CHANGE_EPSILON {
            Self::Widened
        } else {
            Self::Unchanged
        }
    }
}

impl fmt::Display for SpreadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Narrowed => write!(f, "narrowed"),
            Self::Widened => write!(f, "widened"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: Symbol,
    pub spot_entry_price: Price,
    pub futures_entry_price: Price,
    pub spot_exit_price: Price,
    pub futures_exit_price: Price,
    pub spot_qty: Size,
    pub futures_qty: Size,
    pub entry_spread_pct: Decimal,
    pub exit_spread_pct: Decimal,
    pub spread_change_pct: Decimal,
    pub spread_direction: SpreadDirection,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub spot_pnl: Decimal,
    pub futures_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub commission: Decimal,
    pub net_pnl: Decimal,
    pub exit_mode: ExitMode,
    pub funding_observations: u32,
    /// False when funding history could not be fetched and zero was assumed.
    pub funding_reconciled: bool,
}

impl ClosedPosition {
    /// Price PnL excluding funding and fees.
    #[must_use]
    pub fn price_pnl(&self) -> Decimal {
        self.spot_pnl + self.futures_pnl
    }

    #[must_use]
    pub fn holding_hours(&self) -> i64 {
        (self.closed_at - self.opened_at).num_hours()
    }
}

/// Symbol excluded from opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub symbol: Symbol,
    pub reason: String,
    pub error_code: Option<i64>,
    pub added_at: DateTime<Utc>,
}

/// Aggregate statistics over closed positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub total_trades: usize,
    pub win_count: usize,
    pub loss_count: usize,
    /// Percentage of trades with positive net PnL.
    pub win_rate_pct: Decimal,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub best_pnl: Decimal,
    pub worst_pnl: Decimal,
    pub total_funding: Decimal,
    pub total_commission: Decimal,
}

impl TradeStatistics {
    /// Fold closed records into statistics. Empty input yields all zeros.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ClosedPosition>) -> Self {
        let mut stats = Self::default();
        let mut best: Option<Decimal> = None;
        let mut worst: Option<Decimal> = None;

        for r in records {
            stats.total_trades += 1;
            stats.total_pnl += r.net_pnl;
            stats.total_funding += r.funding_pnl;
            stats.total_commission += r.commission;
            if r.net_pnl > Decimal::ZERO {
                stats.win_count += 1;
            } else {
                stats.loss_count += 1;
            }
            best = Some(best.map_or(r.net_pnl, |b| b.max(r.net_pnl)));
            worst = Some(worst.map_or(r.net_pnl, |w| w.min(r.net_pnl)));
        }

        if stats.total_trades > 0 {
            let n = Decimal::from(stats.total_trades);
            stats.avg_pnl = stats.total_pnl / n;
            stats.win_rate_pct = Decimal::from(stats.win_count) / n * Decimal::ONE_HUNDRED;
        }
        stats.best_pnl = best.unwrap_or_default();
        stats.worst_pnl = worst.unwrap_or_default();
        stats
    }
}
