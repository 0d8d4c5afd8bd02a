//! Venue trait consumed by the position lifecycle.
//!
//! One object-safe seam over market data, order execution and funding
//! history, so the lifecycle can be driven by a scripted venue in tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use carry_core::{MarketQuote, OrderSide, Price, Size, Symbol};

use crate::client::ExchangeClient;
use crate::error::ExchangeResult;
use crate::funding::FundingReconciler;
use crate::instruments::InstrumentCache;
use crate::market_data::MarketDataService;
use crate::orders::{FillPolling, OrderExecutor, OrderFill};
use crate::transport::BoxFuture;

/// Exchange operations used by the engine.
pub trait Venue: Send + Sync {
    /// Live quote for one symbol.
    fn quote<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, ExchangeResult<MarketQuote>>;

    /// Quotes for all symbols listed on both books.
    fn market_snapshot(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketQuote>>>;

    fn set_leverage<'a>(
        &'a self,
        symbol: &'a Symbol,
        leverage: u32,
    ) -> BoxFuture<'a, ExchangeResult<()>>;

    /// Futures quantity for a notional, rounded to the instrument step.
    fn futures_qty_for_notional<'a>(
        &'a self,
        symbol: &'a Symbol,
        notional_usd: Decimal,
        price: Price,
    ) -> BoxFuture<'a, ExchangeResult<Size>>;

    fn place_futures_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        qty: Size,
        side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>>;

    fn place_spot_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        notional_usd: Decimal,
        side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>>;

    fn close_spot_by_balance<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>>;

    fn close_futures_position<'a>(
        &'a self,
        symbol: &'a Symbol,
        qty: Size,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>>;

    /// Net funding received over `[from, to)`.
    fn realized_funding<'a>(
        &'a self,
        symbol: &'a Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'a, ExchangeResult<Decimal>>;
}

/// Arc wrapper for Venue trait objects.
pub type DynVenue = Arc<dyn Venue>;

/// Bybit v5 implementation composed from the service objects.
pub struct BybitVenue {
    market: MarketDataService,
    orders: OrderExecutor,
    funding: FundingReconciler,
}

impl BybitVenue {
    pub fn new(client: Arc<ExchangeClient>, instrument_ttl: Duration, polling: FillPolling) -> Self {
        let instruments = Arc::new(InstrumentCache::new(Arc::clone(&client), instrument_ttl));
        Self {
            market: MarketDataService::new(Arc::clone(&client)),
            orders: OrderExecutor::new(Arc::clone(&client), instruments, polling),
            funding: FundingReconciler::new(client),
        }
    }

    #[must_use]
    pub fn market(&self) -> &MarketDataService {
        &self.market
    }

    #[must_use]
    pub fn orders(&self) -> &OrderExecutor {
        &self.orders
    }
}

impl Venue for BybitVenue {
    fn quote<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, ExchangeResult<MarketQuote>> {
        Box::pin(self.market.quote(symbol))
    }

    fn market_snapshot(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketQuote>>> {
        Box::pin(self.market.bulk_quotes())
    }

    fn set_leverage<'a>(
        &'a self,
        symbol: &'a Symbol,
        leverage: u32,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(self.orders.set_leverage(symbol, leverage))
    }

    fn futures_qty_for_notional<'a>(
        &'a self,
        symbol: &'a Symbol,
        notional_usd: Decimal,
        price: Price,
    ) -> BoxFuture<'a, ExchangeResult<Size>> {
        Box::pin(self.orders.futures_qty_for_notional(symbol, notional_usd, price))
    }

    fn place_futures_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        qty: Size,
        side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(self.orders.place_futures_order(symbol, qty, side))
    }

    fn place_spot_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        notional_usd: Decimal,
        side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(self.orders.place_spot_order(symbol, notional_usd, side))
    }

    fn close_spot_by_balance<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(self.orders.close_spot_position_by_balance(symbol))
    }

    fn close_futures_position<'a>(
        &'a self,
        symbol: &'a Symbol,
        qty: Size,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(self.orders.close_futures_position(symbol, qty))
    }

    fn realized_funding<'a>(
        &'a self,
        symbol: &'a Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(self.funding.realized_funding(symbol, from, to))
    }
}
