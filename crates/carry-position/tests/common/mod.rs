//! Shared fixtures for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use carry_core::{Bbo, EntryThresholds, MarketQuote, OrderSide, Price, Size, Symbol};
use carry_exchange::{BoxFuture, ExchangeError, ExchangeResult, OrderFill, Venue};
use carry_position::{
    BlacklistCache, EngineContext, ExitThresholds, LifecycleConfig, LifecycleManager,
    MemoryStore, NotificationEvent, NotificationSink, DEFAULT_CRITICAL_CODES,
};

/// Failure to inject into a scripted venue call.
#[derive(Debug, Clone, Copy)]
pub enum Fail {
    Rejected(i64),
    Unconfirmed,
    Transient,
}

impl Fail {
    fn to_error(self) -> ExchangeError {
        match self {
            Self::Rejected(code) => ExchangeError::OrderRejected {
                code: Some(code),
                reason: format!("rejected with {code}"),
            },
            Self::Unconfirmed => ExchangeError::FillUnconfirmed {
                order_id: "order-1".into(),
            },
            Self::Transient => ExchangeError::Transient {
                attempts: 4,
                message: "timeout".into(),
            },
        }
    }
}

#[derive(Default)]
struct Script {
    quotes: VecDeque<MarketQuote>,
    fail_leverage: Option<Fail>,
    fail_futures_open: Option<Fail>,
    fail_spot_open: Option<Fail>,
    fail_spot_close: Option<Fail>,
    fail_futures_close: Option<Fail>,
    /// Share of the requested futures buy-back that fills.
    futures_close_ratio: Option<Decimal>,
    fail_funding: bool,
    funding: Decimal,
}

/// Venue driven by scripted quotes. Orders fill at the current quote.
#[derive(Default)]
pub struct ScriptedVenue {
    script: Mutex<Script>,
    calls: Mutex<Vec<&'static str>>,
    order_delay: Mutex<Option<Duration>>,
}

impl ScriptedVenue {
    pub fn new(quote: MarketQuote) -> Arc<Self> {
        let venue = Self::default();
        venue.script.lock().quotes.push_back(quote);
        Arc::new(venue)
    }

    /// Queue a quote; the last one repeats.
    pub fn push_quote(&self, quote: MarketQuote) {
        self.script.lock().quotes.push_back(quote);
    }

    pub fn set_quote(&self, quote: MarketQuote) {
        let mut s = self.script.lock();
        s.quotes.clear();
        s.quotes.push_back(quote);
    }

    pub fn fail_leverage(&self, fail: Fail) {
        self.script.lock().fail_leverage = Some(fail);
    }

    pub fn fail_futures_open(&self, fail: Fail) {
        self.script.lock().fail_futures_open = Some(fail);
    }

    pub fn fail_spot_open(&self, fail: Fail) {
        self.script.lock().fail_spot_open = Some(fail);
    }

    pub fn clear_spot_open_failure(&self) {
        self.script.lock().fail_spot_open = None;
    }

    pub fn fail_spot_close(&self, fail: Option<Fail>) {
        self.script.lock().fail_spot_close = fail;
    }

    pub fn fail_futures_close(&self, fail: Fail) {
        self.script.lock().fail_futures_close = Some(fail);
    }

    pub fn fill_futures_close_partially(&self, ratio: Decimal) {
        self.script.lock().futures_close_ratio = Some(ratio);
    }

    pub fn fail_funding(&self) {
        self.script.lock().fail_funding = true;
    }

    pub fn set_funding(&self, funding: Decimal) {
        self.script.lock().funding = funding;
    }

    pub fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    fn current_quote(&self) -> MarketQuote {
        let mut s = self.script.lock();
        if s.quotes.len() > 1 {
            s.quotes.pop_front().unwrap()
        } else {
            s.quotes.front().cloned().unwrap()
        }
    }

    fn peek_quote(&self) -> MarketQuote {
        self.script.lock().quotes.front().cloned().unwrap()
    }

    async fn delay(&self) {
        let delay = *self.order_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    fn fill(price: Price, qty: Size) -> OrderFill {
        OrderFill {
            order_id: "order-1".into(),
            avg_price: price,
            qty,
        }
    }
}

impl Venue for ScriptedVenue {
    fn quote<'a>(&'a self, _symbol: &'a Symbol) -> BoxFuture<'a, ExchangeResult<MarketQuote>> {
        Box::pin(async move {
            self.record("quote");
            Ok(self.current_quote())
        })
    }

    fn market_snapshot(&self) -> BoxFuture<'_, ExchangeResult<Vec<MarketQuote>>> {
        Box::pin(async move { Ok(vec![self.peek_quote()]) })
    }

    fn set_leverage<'a>(
        &'a self,
        _symbol: &'a Symbol,
        _leverage: u32,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            self.record("set_leverage");
            match self.script.lock().fail_leverage {
                Some(f) => Err(f.to_error()),
                None => Ok(()),
            }
        })
    }

    fn futures_qty_for_notional<'a>(
        &'a self,
        _symbol: &'a Symbol,
        notional_usd: Decimal,
        price: Price,
    ) -> BoxFuture<'a, ExchangeResult<Size>> {
        Box::pin(async move {
            let qty = (notional_usd / price.inner())
                .round_dp_with_strategy(3, RoundingStrategy::ToZero);
            Ok(Size::new(qty))
        })
    }

    fn place_futures_order<'a>(
        &'a self,
        _symbol: &'a Symbol,
        qty: Size,
        _side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record("futures_open");
            self.delay().await;
            if let Some(f) = self.script.lock().fail_futures_open {
                return Err(f.to_error());
            }
            Ok(Self::fill(self.peek_quote().futures.bid, qty))
        })
    }

    fn place_spot_order<'a>(
        &'a self,
        _symbol: &'a Symbol,
        notional_usd: Decimal,
        _side: OrderSide,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record("spot_open");
            if let Some(f) = self.script.lock().fail_spot_open {
                return Err(f.to_error());
            }
            let ask = self.peek_quote().spot.ask;
            let qty = (notional_usd / ask.inner()).round_dp(6);
            Ok(Self::fill(ask, Size::new(qty)))
        })
    }

    fn close_spot_by_balance<'a>(
        &'a self,
        _symbol: &'a Symbol,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record("spot_close");
            if let Some(f) = self.script.lock().fail_spot_close {
                return Err(f.to_error());
            }
            Ok(Self::fill(self.peek_quote().spot.bid, Size::new(dec!(1))))
        })
    }

    fn close_futures_position<'a>(
        &'a self,
        _symbol: &'a Symbol,
        qty: Size,
    ) -> BoxFuture<'a, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record("futures_close");
            let ratio = {
                let s = self.script.lock();
                if let Some(f) = s.fail_futures_close {
                    return Err(f.to_error());
                }
                s.futures_close_ratio
            };
            let filled = match ratio {
                Some(r) => Size::new((qty.inner() * r).round_dp(3)),
                None => qty,
            };
            Ok(Self::fill(self.peek_quote().futures.ask, filled))
        })
    }

    fn realized_funding<'a>(
        &'a self,
        _symbol: &'a Symbol,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(async move {
            self.record("funding");
            let s = self.script.lock();
            if s.fail_funding {
                Err(Fail::Transient.to_error())
            } else {
                Ok(s.funding)
            }
        })
    }
}

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: NotificationEvent) {
        self.events.lock().push(event);
    }
}

pub fn symbol() -> Symbol {
    Symbol::new("SOLUSDT").unwrap()
}

/// Quote with spot ask 100 and the given futures bid, funding and exit spread.
///
/// Spot bid is 100 as well, so `exit_spread_pct == futures_ask - 100`.
pub fn quote(futures_bid: Decimal, futures_ask: Decimal, funding_pct: Decimal) -> MarketQuote {
    MarketQuote {
        symbol: symbol(),
        spot: Bbo::new(Price::new(dec!(100)), Price::new(dec!(100))),
        futures: Bbo::new(Price::new(futures_bid), Price::new(futures_ask)),
        funding_rate_pct: funding_pct,
    }
}

/// Spread 0.50%, funding 0.03%.
pub fn entry_quote() -> MarketQuote {
    quote(dec!(100.5), dec!(100.6), dec!(0.03))
}

pub fn config() -> LifecycleConfig {
    LifecycleConfig {
        trade_notional_usd: dec!(30),
        leverage: 1,
        max_open_positions: 3,
        entry: EntryThresholds {
            min_spread_pct: dec!(0.45),
            min_funding_pct: dec!(0.02),
        },
        exit: ExitThresholds {
            normal_close_funding_pct: dec!(-0.001),
            max_close_spread_pct: dec!(0.15),
            soft_tracking_funding_pct: dec!(0.01),
            soft_close_funding_pct: dec!(0.01),
            soft_close_min_count: 15,
        },
        commission_rate_pct: dec!(0.27),
        monitor_interval: Duration::from_secs(300),
    }
}

pub struct Harness {
    pub venue: Arc<ScriptedVenue>,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub blacklist: Arc<BlacklistCache>,
    pub manager: Arc<LifecycleManager>,
}

pub fn harness(venue: Arc<ScriptedVenue>, config: LifecycleConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let blacklist = Arc::new(
        BlacklistCache::load(
            Arc::clone(&store) as _,
            DEFAULT_CRITICAL_CODES,
            Arc::clone(&sink) as _,
        )
        .unwrap(),
    );
    let ctx = EngineContext::new(
        Arc::clone(&venue) as _,
        Arc::clone(&store) as _,
        Arc::clone(&blacklist),
        Arc::clone(&sink) as _,
        config,
    );
    Harness {
        venue,
        store,
        sink,
        blacklist,
        manager: Arc::new(LifecycleManager::new(ctx)),
    }
}
