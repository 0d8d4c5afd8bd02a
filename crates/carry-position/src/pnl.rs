//! Realized PnL of a closed hedged pair.
//!
//! ```text
//! spot_pnl    = (spot_exit - spot_entry) * spot_qty
//! futures_pnl = (futures_entry - futures_exit) * futures_qty
//! commission  = (entry_notional + exit_notional) * rate
//! net_pnl     = spot_pnl + futures_pnl + funding - commission
//! ```
//!
//! Each notional is the average of the two legs' notionals at that price set.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use carry_core::{Price, Size};

/// Prices, quantities and realized funding of one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnlInputs {
    pub spot_entry: Price,
    pub spot_exit: Price,
    pub spot_qty: Size,
    pub futures_entry: Price,
    pub futures_exit: Price,
    pub futures_qty: Size,
    /// Net funding received (positive = income).
    pub funding: Decimal,
}

impl PnlInputs {
    #[must_use]
    pub fn entry_notional(&self) -> Decimal {
        (self.spot_qty * self.spot_entry + self.futures_qty * self.futures_entry) / Decimal::TWO
    }

    #[must_use]
    pub fn exit_notional(&self) -> Decimal {
        (self.spot_qty * self.spot_exit + self.futures_qty * self.futures_exit) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlBreakdown {
    pub spot_pnl: Decimal,
    pub futures_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub commission: Decimal,
    pub net_pnl: Decimal,
}

impl PnlBreakdown {
    #[must_use]
    pub fn price_pnl(&self) -> Decimal {
        self.spot_pnl + self.futures_pnl
    }
}

/// Pure PnL calculator.
#[derive(Debug, Clone, Copy)]
pub struct PnlEngine {
    /// Round-trip commission in percent of notional (0.27 = 0.27%).
    commission_rate_pct: Decimal,
}

impl PnlEngine {
    pub fn new(commission_rate_pct: Decimal) -> Self {
        Self {
            commission_rate_pct,
        }
    }

    #[must_use]
    pub fn commission_rate_pct(&self) -> Decimal {
        self.commission_rate_pct
    }

    #[must_use]
    pub fn compute(&self, inputs: &PnlInputs) -> PnlBreakdown {
        let spot_pnl = (inputs.spot_exit - inputs.spot_entry) * inputs.spot_qty.inner();
        let futures_pnl = (inputs.futures_entry - inputs.futures_exit) * inputs.futures_qty.inner();
        let commission = (inputs.entry_notional() + inputs.exit_notional())
            * self.commission_rate_pct
            / Decimal::ONE_HUNDRED;
        let net_pnl = spot_pnl + futures_pnl + inputs.funding - commission;

        PnlBreakdown {
            spot_pnl,
            futures_pnl,
            funding_pnl: inputs.funding,
            commission,
            net_pnl,
        }
    }
}
