//! Market identifiers and quote types.

use crate::error::{CoreError, Result};
use crate::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading pair traded on both the spot and linear-perpetual books (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, normalizing to upper case.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let s = raw.as_ref().trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base coin, assuming a USDT quote (`BTCUSDT` -> `BTC`).
    pub fn base_coin(&self) -> &str {
        self.0.strip_suffix("USDT").unwrap_or(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Product category on the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Spot,
    /// USDT-margined perpetual futures.
    Linear,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire representation (`Buy` / `Sell`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top of book for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bbo {
    pub bid: Price,
    pub ask: Price,
}

impl Bbo {
    pub fn new(bid: Price, ask: Price) -> Self {
        Self { bid, ask }
    }

    /// Both sides present and not crossed.
    pub fn is_valid(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.bid <= self.ask
    }
}

/// Combined spot/futures view of one symbol at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub symbol: Symbol,
    pub spot: Bbo,
    pub futures: Bbo,
    /// Current funding rate in percent (0.01 = 0.01%).
    pub funding_rate_pct: Decimal,
}

impl MarketQuote {
    /// Spread captured when opening: buy spot at ask, short futures at bid.
    ///
    /// `(futures_bid - spot_ask) / spot_ask * 100`
    pub fn entry_spread_pct(&self) -> Option<Decimal> {
        self.futures.bid.pct_from(self.spot.ask)
    }

    /// Spread paid when closing: sell spot at bid, buy futures back at ask.
    ///
    /// `(futures_ask - spot_bid) / spot_bid * 100`
    pub fn exit_spread_pct(&self) -> Option<Decimal> {
        self.futures.ask.pct_from(self.spot.bid)
    }

    pub fn is_valid(&self) -> bool {
        self.spot.is_valid() && self.futures.is_valid()
    }
}
