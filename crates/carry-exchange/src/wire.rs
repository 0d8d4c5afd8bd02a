//! Bybit v5 REST endpoints and response payloads.
//!
//! Numeric fields arrive as strings (sometimes empty), so payloads keep
//! them as `String` and callers parse with [`parse_decimal`].

use rust_decimal::Decimal;
use serde::Deserialize;

/// REST endpoints used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ServerTime,
    Orderbook,
    Tickers,
    InstrumentsInfo,
    SetLeverage,
    OrderCreate,
    OrderHistory,
    WalletBalance,
    ExecutionList,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::ServerTime => "/v5/market/time",
            Self::Orderbook => "/v5/market/orderbook",
            Self::Tickers => "/v5/market/tickers",
            Self::InstrumentsInfo => "/v5/market/instruments-info",
            Self::SetLeverage => "/v5/position/set-leverage",
            Self::OrderCreate => "/v5/order/create",
            Self::OrderHistory => "/v5/order/history",
            Self::WalletBalance => "/v5/account/wallet-balance",
            Self::ExecutionList => "/v5/execution/list",
        }
    }

    /// Rate-limit weight charged against the weight bucket.
    pub fn weight(&self) -> u32 {
        1
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ServerTime => "server_time",
            Self::Orderbook => "orderbook",
            Self::Tickers => "tickers",
            Self::InstrumentsInfo => "instruments_info",
            Self::SetLeverage => "set_leverage",
            Self::OrderCreate => "order_create",
            Self::OrderHistory => "order_history",
            Self::WalletBalance => "wallet_balance",
            Self::ExecutionList => "execution_list",
        }
    }
}

/// Exchange return codes with special handling.
pub mod ret_code {
    pub const OK: i64 = 0;
    /// Request parameter error; also "symbol not found".
    pub const PARAM_ERROR: i64 = 10001;
    /// Timestamp outside the receive window.
    pub const TIMESTAMP_EXPIRED: i64 = 10002;
    /// Too many visits.
    pub const RATE_LIMITED: i64 = 10006;
    /// Internal server error.
    pub const SERVER_ERROR: i64 = 10016;
    /// Leverage not modified; also margin-mode rejection on some calls.
    pub const LEVERAGE_NOT_MODIFIED: i64 = 110043;
    /// Symbol is being delisted.
    pub const DELISTING: i64 = 30228;
    /// `orderLinkId` already used: an earlier submission reached the venue.
    pub const ORDER_LINK_ID_DUPLICATE: i64 = 110072;

    /// Codes retried by the client.
    pub fn is_retryable(code: i64) -> bool {
        matches!(code, RATE_LIMITED | SERVER_ERROR | TIMESTAMP_EXPIRED)
    }
}

/// Response envelope: `{retCode, retMsg, result, time}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub time: Option<i64>,
}

/// Parse a decimal string; empty or malformed values yield `None`.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResult {
    pub time_second: String,
    #[serde(default)]
    pub time_nano: String,
}

impl ServerTimeResult {
    /// Server time in milliseconds, preferring nanosecond precision.
    pub fn millis(&self) -> Option<u64> {
        if let Ok(nanos) = self.time_nano.parse::<u128>() {
            return Some((nanos / 1_000_000) as u64);
        }
        self.time_second.parse::<u64>().ok().map(|s| s * 1000)
    }
}

/// Orderbook snapshot; levels are `[price, size]` pairs.
#[derive(Debug, Deserialize)]
pub struct OrderbookResult {
    #[serde(default)]
    pub s: String,
    #[serde(default)]
    pub b: Vec<[String; 2]>,
    #[serde(default)]
    pub a: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct TickersResult {
    #[serde(default)]
    pub list: Vec<TickerItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerItem {
    pub symbol: String,
    #[serde(default)]
    pub bid1_price: String,
    #[serde(default)]
    pub ask1_price: String,
    #[serde(default)]
    pub last_price: String,
    /// Fraction per funding interval (linear only).
    #[serde(default)]
    pub funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentsResult {
    #[serde(default)]
    pub list: Vec<InstrumentItem>,
    #[serde(default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentItem {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    /// Spot quantity precision.
    #[serde(default)]
    pub base_precision: String,
    /// Futures quantity step.
    #[serde(default)]
    pub qty_step: String,
    #[serde(default)]
    pub min_order_qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateResult {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderHistoryResult {
    #[serde(default)]
    pub list: Vec<OrderRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    #[serde(default)]
    pub order_status: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub cum_exec_qty: String,
    #[serde(default)]
    pub reject_reason: String,
}

impl OrderRecord {
    /// Terminal without any fill.
    pub fn is_dead(&self) -> bool {
        matches!(self.order_status.as_str(), "Rejected" | "Cancelled" | "Deactivated")
            && parse_decimal(&self.cum_exec_qty).unwrap_or_default().is_zero()
    }

    /// Terminal with a fill (fully, or IOC remainder cancelled).
    pub fn is_filled(&self) -> bool {
        match self.order_status.as_str() {
            "Filled" | "PartiallyFilledCanceled" => true,
            "Cancelled" => parse_decimal(&self.cum_exec_qty).is_some_and(|q| !q.is_zero()),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WalletBalanceResult {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
pub struct WalletAccount {
    #[serde(default)]
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalance {
    pub coin: String,
    #[serde(default)]
    pub wallet_balance: String,
    #[serde(default)]
    pub available_to_withdraw: String,
}

impl CoinBalance {
    /// Withdrawable amount, falling back to wallet balance when unreported.
    pub fn available(&self) -> Decimal {
        parse_decimal(&self.available_to_withdraw)
            .filter(|d| !d.is_zero())
            .or_else(|| parse_decimal(&self.wallet_balance))
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionListResult {
    #[serde(default)]
    pub list: Vec<ExecutionRecord>,
    #[serde(default)]
    pub next_page_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub exec_type: String,
    /// Funding fee; positive means paid, negative means received.
    #[serde(default)]
    pub exec_fee: String,
    #[serde(default)]
    pub exec_time: String,
}
