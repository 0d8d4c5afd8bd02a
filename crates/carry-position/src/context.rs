//! Explicitly constructed engine dependencies.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use carry_core::EntryThresholds;
use carry_exchange::DynVenue;

use crate::blacklist::BlacklistCache;
use crate::exit::ExitThresholds;
use crate::notify::DynNotificationSink;
use crate::pnl::PnlEngine;
use crate::store::DynPositionStore;

/// Immutable per-process lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Target notional per position in USDT.
    pub trade_notional_usd: Decimal,
    pub leverage: u32,
    /// Open plus opening positions allowed at once.
    pub max_open_positions: usize,
    pub entry: EntryThresholds,
    pub exit: ExitThresholds,
    /// Round-trip commission in percent of notional.
    pub commission_rate_pct: Decimal,
    pub monitor_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            trade_notional_usd: Decimal::from(30),
            leverage: 1,
            max_open_positions: 1,
            entry: EntryThresholds::default(),
            exit: ExitThresholds::default(),
            commission_rate_pct: Decimal::new(27, 2),
            monitor_interval: Duration::from_secs(300),
        }
    }
}

/// Everything the lifecycle manager talks to.
#[derive(Clone)]
pub struct EngineContext {
    pub venue: DynVenue,
    pub positions: DynPositionStore,
    pub blacklist: Arc<BlacklistCache>,
    pub notifier: DynNotificationSink,
    pub config: LifecycleConfig,
}

impl EngineContext {
    pub fn new(
        venue: DynVenue,
        positions: DynPositionStore,
        blacklist: Arc<BlacklistCache>,
        notifier: DynNotificationSink,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            venue,
            positions,
            blacklist,
            notifier,
            config,
        }
    }

    #[must_use]
    pub fn pnl_engine(&self) -> PnlEngine {
        PnlEngine::new(self.config.commission_rate_pct)
    }
}
