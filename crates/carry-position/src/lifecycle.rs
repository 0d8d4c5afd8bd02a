//! Per-symbol position lifecycle.
//!
//! ```text
//! Idle -> Opening -> Open(Normal) -> Open(SoftClose) -> Closing -> Idle
//!            |                                            |
//!            +-------------> CriticalFault <--------------+
//! ```
//!
//! Opening sends the futures short first; the spot buy is only attempted
//! once the short is confirmed. Closing sells spot first, then buys the
//! futures back. A leg failure after the other leg committed moves the
//! symbol to `CriticalFault`, which is absorbing: the symbol is neither
//! monitored nor reopened until the process restarts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use carry_core::{
    ClosedPosition, ExitMode, MarketQuote, MonitorCounters, OrderSide, Position, Size,
    SpreadDirection, Symbol,
};
use carry_exchange::{ExchangeError, OrderFill};
use carry_telemetry::Metrics;

use crate::context::EngineContext;
use crate::error::{LifecycleError, LifecycleResult};
use crate::exit::{evaluate_exit, ExitDecision, ExitObservation};
use crate::notify::{FaultStage, NotificationEvent};
use crate::pnl::{PnlBreakdown, PnlEngine, PnlInputs};

/// Lifecycle state of a symbol. Absent from the map means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Opening,
    Open(ExitMode),
    Closing,
    CriticalFault,
}

/// Result of one monitor interval.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Hold,
    Closed(ClosedPosition),
    /// No stored position for the symbol.
    Gone,
}

/// Removes an `Opening` entry when the open attempt ends without a position.
struct Reservation<'a> {
    states: &'a DashMap<Symbol, PositionState>,
    symbol: Symbol,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.states
            .remove_if(&self.symbol, |_, state| *state == PositionState::Opening);
    }
}

pub struct LifecycleManager {
    ctx: EngineContext,
    pnl: PnlEngine,
    states: DashMap<Symbol, PositionState>,
    /// Serializes the capacity check with the reservation insert.
    admission: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(ctx: EngineContext) -> Self {
        let pnl = ctx.pnl_engine();
        Self {
            ctx,
            pnl,
            states: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    #[must_use]
    pub fn state(&self, symbol: &Symbol) -> Option<PositionState> {
        self.states.get(symbol).map(|s| *s)
    }

    /// Symbols in any non-idle state, including in-flight opens.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.states.len()
    }

    /// Free slots under the concurrency cap.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.ctx
            .config
            .max_open_positions
            .saturating_sub(self.occupied_slots())
    }

    /// Opening, open and closing symbols. Faulted symbols stay blocked from
    /// reopening but do not hold a slot.
    fn occupied_slots(&self) -> usize {
        self.states
            .iter()
            .filter(|e| *e.value() != PositionState::CriticalFault)
            .count()
    }

    #[must_use]
    pub fn faulted_symbols(&self) -> Vec<Symbol> {
        self.states
            .iter()
            .filter(|e| *e.value() == PositionState::CriticalFault)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Register a stored position found at boot. Returns false if the
    /// symbol already has a state.
    pub fn restore(&self, position: &Position) -> bool {
        let mut inserted = false;
        self.states
            .entry(position.symbol.clone())
            .or_insert_with(|| {
                inserted = true;
                PositionState::Open(position.exit_mode())
            });
        self.publish_gauge();
        inserted
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Open a hedged position for `candidate`.
    pub async fn open(&self, candidate: &MarketQuote) -> LifecycleResult<Position> {
        let symbol = &candidate.symbol;
        if self.ctx.blacklist.is_blacklisted(symbol) {
            return Err(LifecycleError::Blacklisted(symbol.to_string()));
        }

        let reservation = self.reserve(symbol)?;
        if self.ctx.positions.get_by_open_symbol(symbol)?.is_some() {
            return Err(LifecycleError::AlreadyActive(symbol.to_string()));
        }

        let quote = self.revalidate(symbol).await?;
        let config = &self.ctx.config;
        let venue = &self.ctx.venue;

        if let Err(e) = venue.set_leverage(symbol, config.leverage).await {
            return Err(self.abort_open(symbol, e));
        }

        let futures_qty = match venue
            .futures_qty_for_notional(symbol, config.trade_notional_usd, quote.futures.bid)
            .await
        {
            Ok(qty) => qty,
            Err(e) => return Err(self.abort_open(symbol, e)),
        };

        info!(
            symbol = %symbol,
            qty = %futures_qty,
            bid = %quote.futures.bid,
            "Opening futures short"
        );
        let futures_fill = match venue
            .place_futures_order(symbol, futures_qty, OrderSide::Sell)
            .await
        {
            Ok(fill) => fill,
            Err(e @ ExchangeError::FillUnconfirmed { .. }) => {
                return Err(self.escalate(
                    symbol,
                    FaultStage::OpenFuturesUnconfirmed,
                    futures_qty,
                    &e.to_string(),
                ));
            }
            Err(e) => return Err(self.abort_open(symbol, e)),
        };

        // Hedge the filled base quantity at the current spot ask.
        let spot_notional = futures_fill.qty.notional(quote.spot.ask);
        info!(symbol = %symbol, notional = %spot_notional, "Opening spot leg");
        let spot_fill = match venue
            .place_spot_order(symbol, spot_notional, OrderSide::Buy)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                self.ctx.blacklist.apply_error_policy(symbol, &e);
                return Err(self.escalate(
                    symbol,
                    FaultStage::OpenSpotLeg,
                    futures_fill.qty,
                    &e.to_string(),
                ));
            }
        };

        let entry_spread_pct = futures_fill
            .avg_price
            .pct_from(spot_fill.avg_price)
            .or_else(|| quote.entry_spread_pct())
            .unwrap_or_default();
        let position = Position {
            symbol: symbol.clone(),
            spot_entry_price: spot_fill.avg_price,
            futures_entry_price: futures_fill.avg_price,
            spot_qty: spot_fill.qty,
            futures_qty: futures_fill.qty,
            entry_spread_pct,
            entry_funding_rate_pct: quote.funding_rate_pct,
            leverage: config.leverage,
            opened_at: Utc::now(),
            counters: MonitorCounters::default(),
        };

        if let Err(e) = self.ctx.positions.create(&position) {
            return Err(self.escalate(
                symbol,
                FaultStage::StoreDivergence,
                Size::ZERO,
                &format!("filled position not persisted: {e}"),
            ));
        }

        self.states
            .insert(symbol.clone(), PositionState::Open(ExitMode::Normal));
        drop(reservation);
        self.publish_gauge();
        Metrics::lifecycle_transition("opened");
        info!(
            symbol = %symbol,
            spot_price = %position.spot_entry_price,
            futures_price = %position.futures_entry_price,
            spot_qty = %position.spot_qty,
            futures_qty = %position.futures_qty,
            spread_pct = %position.entry_spread_pct,
            funding_pct = %position.entry_funding_rate_pct,
            "Position opened"
        );
        self.ctx.notifier.notify(NotificationEvent::PositionOpened {
            position: position.clone(),
        });
        Ok(position)
    }

    fn reserve(&self, symbol: &Symbol) -> LifecycleResult<Reservation<'_>> {
        let _admission = self.admission.lock();
        if self.states.contains_key(symbol) {
            return Err(LifecycleError::AlreadyActive(symbol.to_string()));
        }
        let max = self.ctx.config.max_open_positions;
        if self.occupied_slots() >= max {
            return Err(LifecycleError::CapacityReached { max });
        }
        self.states.insert(symbol.clone(), PositionState::Opening);
        Ok(Reservation {
            states: &self.states,
            symbol: symbol.clone(),
        })
    }

    /// Re-read the live quote and check it still meets entry thresholds.
    async fn revalidate(&self, symbol: &Symbol) -> LifecycleResult<MarketQuote> {
        let quote = match self.ctx.venue.quote(symbol).await {
            Ok(q) => q,
            Err(e) => return Err(self.abort_open(symbol, e)),
        };
        if !self.ctx.config.entry.admits(&quote) {
            Metrics::lifecycle_transition("open_aborted");
            let reason = format!(
                "spread {} funding {}",
                quote
                    .entry_spread_pct()
                    .map_or_else(|| "n/a".to_string(), |s| s.round_dp(4).to_string()),
                quote.funding_rate_pct
            );
            info!(symbol = %symbol, %reason, "Candidate no longer meets entry thresholds");
            return Err(LifecycleError::EntryInvalidated {
                symbol: symbol.to_string(),
                reason,
            });
        }
        Ok(quote)
    }

    /// Nothing is held: apply blacklist policy and give up.
    fn abort_open(&self, symbol: &Symbol, error: ExchangeError) -> LifecycleError {
        let blacklisted = self.ctx.blacklist.apply_error_policy(symbol, &error);
        Metrics::lifecycle_transition("open_aborted");
        warn!(symbol = %symbol, error = %error, blacklisted, "Open aborted before spot leg");
        LifecycleError::OpenAborted {
            symbol: symbol.to_string(),
            source: error,
        }
    }

    fn escalate(
        &self,
        symbol: &Symbol,
        stage: FaultStage,
        unhedged_futures_qty: Size,
        message: &str,
    ) -> LifecycleError {
        self.states
            .insert(symbol.clone(), PositionState::CriticalFault);
        self.publish_gauge();
        Metrics::critical_fault(symbol.as_str());
        error!(
            symbol = %symbol,
            stage = %stage,
            unhedged_futures_qty = %unhedged_futures_qty,
            error = message,
            "CRITICAL: exchange exposure does not match stored state, manual action required"
        );
        self.ctx.notifier.notify(NotificationEvent::CriticalFault {
            symbol: symbol.clone(),
            stage,
            unhedged_futures_qty,
            error: message.to_string(),
        });
        LifecycleError::CriticalFault {
            symbol: symbol.to_string(),
            message: format!("{stage}: {message}"),
        }
    }

    // ========================================================================
    // Monitor
    // ========================================================================

    /// Run one monitor interval for `symbol`.
    pub async fn monitor_tick(&self, symbol: &Symbol) -> LifecycleResult<TickOutcome> {
        if self.state(symbol) == Some(PositionState::CriticalFault) {
            return Err(LifecycleError::CriticalFault {
                symbol: symbol.to_string(),
                message: "symbol is in critical fault".to_string(),
            });
        }
        let Some(mut position) = self.ctx.positions.get_by_open_symbol(symbol)? else {
            self.states
                .remove_if(symbol, |_, s| matches!(s, PositionState::Open(_)));
            self.publish_gauge();
            return Ok(TickOutcome::Gone);
        };

        let quote = self.ctx.venue.quote(symbol).await?;
        let exit_spread_pct = match quote.exit_spread_pct() {
            Some(spread) if quote.is_valid() => spread,
            _ => {
                warn!(symbol = %symbol, "Incomplete order book, skipping interval");
                return Ok(TickOutcome::Hold);
            }
        };

        let was_armed = position.counters.soft_close_armed;
        let decision = evaluate_exit(
            &mut position.counters,
            ExitObservation {
                funding_rate_pct: quote.funding_rate_pct,
                exit_spread_pct,
            },
            &self.ctx.config.exit,
        );
        self.ctx
            .positions
            .update_counters(symbol, position.counters)?;

        if position.counters.soft_close_armed != was_armed {
            info!(
                symbol = %symbol,
                armed = position.counters.soft_close_armed,
                streak = position.counters.low_funding_streak,
                "Soft-close mode changed"
            );
        }
        self.states
            .insert(symbol.clone(), PositionState::Open(position.exit_mode()));

        match decision {
            ExitDecision::Hold => {
                debug!(
                    symbol = %symbol,
                    observations = position.counters.funding_observations,
                    "Holding position"
                );
                Ok(TickOutcome::Hold)
            }
            ExitDecision::Close(mode) => {
                info!(
                    symbol = %symbol,
                    mode = %mode,
                    funding_pct = %quote.funding_rate_pct,
                    exit_spread_pct = %exit_spread_pct,
                    "Exit conditions met"
                );
                self.close(&position, mode).await.map(TickOutcome::Closed)
            }
        }
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close `position`: spot by live balance, then futures reduce-only.
    pub async fn close(
        &self,
        position: &Position,
        mode: ExitMode,
    ) -> LifecycleResult<ClosedPosition> {
        let symbol = &position.symbol;
        if !self.begin_close(symbol) {
            return Err(LifecycleError::NotOpen(symbol.to_string()));
        }
        let venue = &self.ctx.venue;
        info!(symbol = %symbol, mode = %mode, "Closing position");

        let spot_fill = match venue.close_spot_by_balance(symbol).await {
            Ok(fill) => fill,
            Err(e @ ExchangeError::FillUnconfirmed { .. }) => {
                return Err(self.escalate(
                    symbol,
                    FaultStage::CloseSpotUnconfirmed,
                    position.futures_qty,
                    &e.to_string(),
                ));
            }
            Err(e) => {
                self.states
                    .insert(symbol.clone(), PositionState::Open(position.exit_mode()));
                warn!(symbol = %symbol, error = %e, "Spot sale failed, will retry next interval");
                return Err(LifecycleError::CloseFailed {
                    symbol: symbol.to_string(),
                    source: e,
                });
            }
        };

        let futures_fill = match venue
            .close_futures_position(symbol, position.futures_qty)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                return Err(self.escalate(
                    symbol,
                    FaultStage::CloseFuturesLeg,
                    position.futures_qty,
                    &e.to_string(),
                ));
            }
        };
        if futures_fill.qty.inner() < position.futures_qty.inner() {
            let residual = Size::new(position.futures_qty.inner() - futures_fill.qty.inner());
            return Err(self.escalate(
                symbol,
                FaultStage::CloseFuturesLeg,
                residual,
                &format!(
                    "futures buy-back filled {} of {}",
                    futures_fill.qty, position.futures_qty
                ),
            ));
        }

        let closed_at = Utc::now();
        let (funding, funding_reconciled) = match venue
            .realized_funding(symbol, position.opened_at, closed_at)
            .await
        {
            Ok(funding) => (funding, true),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Funding reconciliation failed, assuming zero");
                (Decimal::ZERO, false)
            }
        };

        let pnl = self.pnl.compute(&PnlInputs {
            spot_entry: position.spot_entry_price,
            spot_exit: spot_fill.avg_price,
            spot_qty: position.spot_qty,
            futures_entry: position.futures_entry_price,
            futures_exit: futures_fill.avg_price,
            futures_qty: position.futures_qty,
            funding,
        });
        let record = closed_record(
            position,
            &spot_fill,
            &futures_fill,
            pnl,
            mode,
            funding_reconciled,
            closed_at,
        );

        let persisted = self
            .ctx
            .positions
            .save_closed(&record)
            .and_then(|()| self.ctx.positions.delete(symbol));
        if let Err(e) = persisted {
            return Err(self.escalate(
                symbol,
                FaultStage::StoreDivergence,
                Size::ZERO,
                &format!("closed position not persisted: {e}"),
            ));
        }

        self.states.remove(symbol);
        self.publish_gauge();
        let holding_hours = (record.closed_at - record.opened_at).num_seconds() as f64 / 3600.0;
        Metrics::position_closed(
            &mode.to_string(),
            record.net_pnl.to_f64().unwrap_or_default(),
            holding_hours,
        );
        info!(
            symbol = %symbol,
            mode = %mode,
            spot_pnl = %record.spot_pnl,
            futures_pnl = %record.futures_pnl,
            funding = %record.funding_pnl,
            commission = %record.commission,
            net_pnl = %record.net_pnl,
            funding_reconciled,
            "Position closed"
        );
        self.ctx.notifier.notify(NotificationEvent::PositionClosed {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Atomically move `Open` to `Closing`.
    fn begin_close(&self, symbol: &Symbol) -> bool {
        match self.states.get_mut(symbol) {
            Some(mut state) if matches!(*state, PositionState::Open(_)) => {
                *state = PositionState::Closing;
                true
            }
            _ => false,
        }
    }

    fn publish_gauge(&self) {
        let held = self
            .states
            .iter()
            .filter(|e| *e.value() != PositionState::Opening)
            .count();
        Metrics::open_positions(held);
    }
}

fn closed_record(
    position: &Position,
    spot_fill: &OrderFill,
    futures_fill: &OrderFill,
    pnl: PnlBreakdown,
    mode: ExitMode,
    funding_reconciled: bool,
    closed_at: DateTime<Utc>,
) -> ClosedPosition {
    let exit_spread_pct = futures_fill
        .avg_price
        .pct_from(spot_fill.avg_price)
        .unwrap_or_default();
    let spread_change_pct = exit_spread_pct - position.entry_spread_pct;

    ClosedPosition {
        symbol: position.symbol.clone(),
        spot_entry_price: position.spot_entry_price,
        futures_entry_price: position.futures_entry_price,
        spot_exit_price: spot_fill.avg_price,
        futures_exit_price: futures_fill.avg_price,
        spot_qty: position.spot_qty,
        futures_qty: position.futures_qty,
        entry_spread_pct: position.entry_spread_pct,
        exit_spread_pct,
        spread_change_pct,
        spread_direction: SpreadDirection::classify(spread_change_pct),
        opened_at: position.opened_at,
        closed_at,
        spot_pnl: pnl.spot_pnl,
        futures_pnl: pnl.futures_pnl,
        funding_pnl: pnl.funding_pnl,
        commission: pnl.commission,
        net_pnl: pnl.net_pnl,
        exit_mode: mode,
        funding_observations: position.counters.funding_observations,
        funding_reconciled,
    }
}
