//! Store interfaces for open positions, history and the blacklist.
//!
//! Calls are synchronous and atomic; implementations keep them short so
//! they can be invoked from async code.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use carry_core::{BlacklistEntry, ClosedPosition, MonitorCounters, Position, Symbol, TradeStatistics};

use crate::error::{StoreError, StoreResult};

/// Durable open-position and history records.
pub trait PositionStore: Send + Sync {
    /// Insert an open position. `Duplicate` if the symbol already has one.
    fn create(&self, position: &Position) -> StoreResult<()>;

    fn get_by_open_symbol(&self, symbol: &Symbol) -> StoreResult<Option<Position>>;

    fn list_open(&self) -> StoreResult<Vec<Position>>;

    fn update_counters(&self, symbol: &Symbol, counters: MonitorCounters) -> StoreResult<()>;

    fn delete(&self, symbol: &Symbol) -> StoreResult<()>;

    fn save_closed(&self, record: &ClosedPosition) -> StoreResult<()>;

    /// Most recent first.
    fn list_recent_closed(&self, limit: usize) -> StoreResult<Vec<ClosedPosition>>;

    fn compute_statistics(&self) -> StoreResult<TradeStatistics>;
}

/// Durable blacklist.
pub trait BlacklistStore: Send + Sync {
    /// Insert `symbol`; an existing entry is kept and returned unchanged.
    fn add(&self, symbol: &Symbol, reason: &str, code: Option<i64>)
        -> StoreResult<BlacklistEntry>;

    /// Returns whether an entry was removed.
    fn remove(&self, symbol: &Symbol) -> StoreResult<bool>;

    fn is_member(&self, symbol: &Symbol) -> StoreResult<bool>;

    fn list_all(&self) -> StoreResult<Vec<BlacklistEntry>>;
}

pub type DynPositionStore = Arc<dyn PositionStore>;
pub type DynBlacklistStore = Arc<dyn BlacklistStore>;

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    open: HashMap<Symbol, Position>,
    closed: Vec<ClosedPosition>,
    blacklist: BTreeMap<Symbol, BlacklistEntry>,
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for MemoryStore {
    fn create(&self, position: &Position) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.open.contains_key(&position.symbol) {
            return Err(StoreError::Duplicate(position.symbol.to_string()));
        }
        state.open.insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    fn get_by_open_symbol(&self, symbol: &Symbol) -> StoreResult<Option<Position>> {
        Ok(self.state.lock().open.get(symbol).cloned())
    }

    fn list_open(&self) -> StoreResult<Vec<Position>> {
        let mut open: Vec<_> = self.state.lock().open.values().cloned().collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(open)
    }

    fn update_counters(&self, symbol: &Symbol, counters: MonitorCounters) -> StoreResult<()> {
        let mut state = self.state.lock();
        let position = state
            .open
            .get_mut(symbol)
            .ok_or_else(|| StoreError::NotFound(symbol.to_string()))?;
        position.counters = counters;
        Ok(())
    }

    fn delete(&self, symbol: &Symbol) -> StoreResult<()> {
        self.state
            .lock()
            .open
            .remove(symbol)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(symbol.to_string()))
    }

    fn save_closed(&self, record: &ClosedPosition) -> StoreResult<()> {
        self.state.lock().closed.push(record.clone());
        Ok(())
    }

    fn list_recent_closed(&self, limit: usize) -> StoreResult<Vec<ClosedPosition>> {
        Ok(self
            .state
            .lock()
            .closed
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn compute_statistics(&self) -> StoreResult<TradeStatistics> {
        Ok(TradeStatistics::from_records(&self.state.lock().closed))
    }
}

impl BlacklistStore for MemoryStore {
    fn add(
        &self,
        symbol: &Symbol,
        reason: &str,
        code: Option<i64>,
    ) -> StoreResult<BlacklistEntry> {
        let mut state = self.state.lock();
        let entry = state
            .blacklist
            .entry(symbol.clone())
            .or_insert_with(|| BlacklistEntry {
                symbol: symbol.clone(),
                reason: reason.to_string(),
                error_code: code,
                added_at: Utc::now(),
            });
        Ok(entry.clone())
    }

    fn remove(&self, symbol: &Symbol) -> StoreResult<bool> {
        Ok(self.state.lock().blacklist.remove(symbol).is_some())
    }

    fn is_member(&self, symbol: &Symbol) -> StoreResult<bool> {
        Ok(self.state.lock().blacklist.contains_key(symbol))
    }

    fn list_all(&self) -> StoreResult<Vec<BlacklistEntry>> {
        Ok(self.state.lock().blacklist.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carry_core::{Price, Size};
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position {
            symbol: Symbol::new(symbol).unwrap(),
            spot_entry_price: Price::new(dec!(100)),
            futures_entry_price: Price::new(dec!(100.5)),
            spot_qty: Size::new(dec!(0.3)),
            futures_qty: Size::new(dec!(0.3)),
            entry_spread_pct: dec!(0.5),
            entry_funding_rate_pct: dec!(0.03),
            leverage: 1,
            opened_at: Utc::now(),
            counters: MonitorCounters::default(),
        }
    }

    #[test]
    fn test_create_rejects_second_open_position() {
        let store = MemoryStore::new();
        store.create(&position("ETHUSDT")).unwrap();
        assert!(matches!(
            store.create(&position("ETHUSDT")),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.list_open().unwrap().len(), 1);
    }

    #[test]
    fn test_update_counters_and_delete() {
        let store = MemoryStore::new();
        let p = position("ETHUSDT");
        store.create(&p).unwrap();

        let counters = MonitorCounters {
            funding_observations: 3,
            low_funding_streak: 2,
            soft_close_armed: false,
        };
        store.update_counters(&p.symbol, counters).unwrap();
        assert_eq!(
            store.get_by_open_symbol(&p.symbol).unwrap().unwrap().counters,
            counters
        );

        store.delete(&p.symbol).unwrap();
        assert!(store.get_by_open_symbol(&p.symbol).unwrap().is_none());
        assert!(matches!(store.delete(&p.symbol), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_blacklist_add_is_idempotent() {
        let store = MemoryStore::new();
        let symbol = Symbol::new("XUSDT").unwrap();
        let first = store.add(&symbol, "delisting", Some(30228)).unwrap();
        let second = store.add(&symbol, "other", None).unwrap();

        assert_eq!(first, second);
        assert!(store.is_member(&symbol).unwrap());
        assert!(store.remove(&symbol).unwrap());
        assert!(!store.remove(&symbol).unwrap());
    }
}
