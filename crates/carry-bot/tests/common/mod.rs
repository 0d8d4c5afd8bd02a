//! Shared fixtures for application tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use carry_bot::{AppConfig, AppResult, NotifyBackend};
use carry_core::{
    ClosedPosition, ExitMode, MonitorCounters, Position, Price, Size, SpreadDirection, Symbol,
};
use carry_exchange::BoxFuture;

pub fn symbol(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

/// Defaults with storage under `dir` and no retries.
pub fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.persistence.data_dir = dir.to_path_buf();
    config.exchange.max_retries = 0;
    config
}

pub fn position(s: &str) -> Position {
    Position {
        symbol: symbol(s),
        spot_entry_price: Price::new(dec!(100)),
        futures_entry_price: Price::new(dec!(100.5)),
        spot_qty: Size::new(dec!(0.298)),
        futures_qty: Size::new(dec!(0.298)),
        entry_spread_pct: dec!(0.5),
        entry_funding_rate_pct: dec!(0.03),
        leverage: 1,
        opened_at: Utc::now(),
        counters: MonitorCounters::default(),
    }
}

pub fn closed(s: &str, funding_reconciled: bool) -> ClosedPosition {
    let opened_at = Utc::now() - ChronoDuration::hours(26);
    ClosedPosition {
        symbol: symbol(s),
        spot_entry_price: Price::new(dec!(100)),
        futures_entry_price: Price::new(dec!(100.5)),
        spot_exit_price: Price::new(dec!(101)),
        futures_exit_price: Price::new(dec!(101.1)),
        spot_qty: Size::new(dec!(0.298)),
        futures_qty: Size::new(dec!(0.298)),
        entry_spread_pct: dec!(0.5),
        exit_spread_pct: dec!(0.099),
        spread_change_pct: dec!(-0.401),
        spread_direction: SpreadDirection::Narrowed,
        opened_at,
        closed_at: opened_at + ChronoDuration::hours(26),
        spot_pnl: dec!(0.298),
        futures_pnl: dec!(-0.1788),
        funding_pnl: dec!(0.05),
        commission: dec!(0.16116138),
        net_pnl: dec!(0.00803862),
        exit_mode: ExitMode::SoftClose,
        funding_observations: 16,
        funding_reconciled,
    }
}

/// Backend that records every delivered text.
#[derive(Default)]
pub struct RecordingBackend {
    texts: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

impl NotifyBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn deliver<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            self.texts.lock().push(text.to_string());
            Ok(())
        })
    }
}

/// Backend whose deliveries always fail.
pub struct FailingBackend;

impl NotifyBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn deliver<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async { Err(carry_bot::AppError::Notify("HTTP 502".into())) })
    }
}

pub fn recording() -> Arc<RecordingBackend> {
    Arc::new(RecordingBackend::default())
}
