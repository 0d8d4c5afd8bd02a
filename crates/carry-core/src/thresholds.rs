//! Entry admission thresholds shared by the scanner and pre-trade checks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::MarketQuote;

/// Minimum entry spread and funding rate, both in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryThresholds {
    #[serde(default = "default_min_spread_pct")]
    pub min_spread_pct: Decimal,
    #[serde(default = "default_min_funding_pct")]
    pub min_funding_pct: Decimal,
}

fn default_min_spread_pct() -> Decimal {
    Decimal::new(45, 2)
}

fn default_min_funding_pct() -> Decimal {
    Decimal::new(2, 2)
}

impl Default for EntryThresholds {
    fn default() -> Self {
        Self {
            min_spread_pct: default_min_spread_pct(),
            min_funding_pct: default_min_funding_pct(),
        }
    }
}

impl EntryThresholds {
    /// Quote is valid and both spread and funding meet their minimums.
    #[must_use]
    pub fn admits(&self, quote: &MarketQuote) -> bool {
        if !quote.is_valid() {
            return false;
        }
        match quote.entry_spread_pct() {
            Some(spread) => {
                spread >= self.min_spread_pct && quote.funding_rate_pct >= self.min_funding_pct
            }
            None => false,
        }
    }
}
