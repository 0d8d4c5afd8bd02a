//! Instrument precision cache.
//!
//! Quantity step and minimum order size per (symbol, category), fetched
//! on demand and refreshed after a TTL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::debug;

use carry_core::{Category, Symbol};

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::{parse_decimal, Endpoint, InstrumentItem, InstrumentsResult};

/// Fallback spot precision when the exchange omits `basePrecision`.
const DEFAULT_SPOT_STEP: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
/// Fallback futures step when the exchange omits `qtyStep`.
const DEFAULT_FUTURES_STEP: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Quantity constraints for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentInfo {
    /// Quantity increment (`basePrecision` on spot, `qtyStep` on linear).
    pub qty_step: Decimal,
    pub min_order_qty: Decimal,
}

impl InstrumentInfo {
    /// Extract constraints from an instrument entry.
    pub fn from_wire(item: &InstrumentItem, category: Category) -> Self {
        let lot = &item.lot_size_filter;
        let qty_step = match category {
            Category::Spot => parse_decimal(&lot.base_precision).unwrap_or(DEFAULT_SPOT_STEP),
            Category::Linear => parse_decimal(&lot.qty_step).unwrap_or(DEFAULT_FUTURES_STEP),
        };
        let min_order_qty = parse_decimal(&lot.min_order_qty).unwrap_or(qty_step);
        Self {
            qty_step,
            min_order_qty,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    info: InstrumentInfo,
    fetched_at: Instant,
}

/// TTL cache over `instruments-info`.
pub struct InstrumentCache {
    client: Arc<ExchangeClient>,
    entries: DashMap<(Symbol, Category), CacheEntry>,
    ttl: Duration,
}

impl InstrumentCache {
    pub fn new(client: Arc<ExchangeClient>, ttl: Duration) -> Self {
        Self {
            client,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached info, fetched if missing or older than the TTL.
    pub async fn get(&self, symbol: &Symbol, category: Category) -> ExchangeResult<InstrumentInfo> {
        let key = (symbol.clone(), category);
        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.info);
            }
        }

        let result: InstrumentsResult = self
            .client
            .get_public(
                Endpoint::InstrumentsInfo,
                &[
                    ("category", category.as_str().to_string()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;
        let item = result
            .list
            .iter()
            .find(|i| i.symbol == symbol.as_str())
            .ok_or_else(|| ExchangeError::NotFound(format!("{category} instrument {symbol}")))?;

        let info = InstrumentInfo::from_wire(item, category);
        debug!(
            %symbol,
            %category,
            qty_step = %info.qty_step,
            min_order_qty = %info.min_order_qty,
            "Instrument info refreshed"
        );
        self.entries.insert(
            key,
            CacheEntry {
                info,
                fetched_at: Instant::now(),
            },
        );
        Ok(info)
    }

    /// Seed an entry (used when instrument data is already at hand).
    pub fn insert(&self, symbol: Symbol, category: Category, info: InstrumentInfo) {
        self.entries.insert(
            (symbol, category),
            CacheEntry {
                info,
                fetched_at: Instant::now(),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
