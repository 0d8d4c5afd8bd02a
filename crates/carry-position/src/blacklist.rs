//! Write-through blacklist cache.
//!
//! Mutations go to the store first, then to the in-memory set. Lookups
//! never touch the store.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;
use tracing::{info, warn};

use carry_core::{BlacklistEntry, Symbol};
use carry_exchange::{ret_code, ExchangeError};

use crate::error::StoreResult;
use crate::notify::{DynNotificationSink, NotificationEvent};
use crate::store::DynBlacklistStore;

/// Codes that blacklist a symbol when seen during order execution.
pub const DEFAULT_CRITICAL_CODES: [i64; 3] = [
    ret_code::DELISTING,
    ret_code::PARAM_ERROR,
    ret_code::LEVERAGE_NOT_MODIFIED,
];

pub struct BlacklistCache {
    store: DynBlacklistStore,
    entries: RwLock<BTreeMap<Symbol, BlacklistEntry>>,
    critical_codes: HashSet<i64>,
    notifier: DynNotificationSink,
}

impl BlacklistCache {
    /// Load the current entries from `store`.
    pub fn load(
        store: DynBlacklistStore,
        critical_codes: impl IntoIterator<Item = i64>,
        notifier: DynNotificationSink,
    ) -> StoreResult<Self> {
        let entries = store
            .list_all()?
            .into_iter()
            .map(|e| (e.symbol.clone(), e))
            .collect::<BTreeMap<_, _>>();
        info!(count = entries.len(), "Blacklist loaded");
        Ok(Self {
            store,
            entries: RwLock::new(entries),
            critical_codes: critical_codes.into_iter().collect(),
            notifier,
        })
    }

    #[must_use]
    pub fn is_blacklisted(&self, symbol: &Symbol) -> bool {
        self.entries.read().contains_key(symbol)
    }

    /// Add `symbol`. Returns `None` when it was already present.
    pub fn add(
        &self,
        symbol: &Symbol,
        reason: &str,
        code: Option<i64>,
    ) -> StoreResult<Option<BlacklistEntry>> {
        if self.is_blacklisted(symbol) {
            return Ok(None);
        }
        let entry = self.store.add(symbol, reason, code)?;
        let inserted = self
            .entries
            .write()
            .insert(symbol.clone(), entry.clone())
            .is_none();
        if inserted {
            warn!(symbol = %symbol, reason, code, "Symbol blacklisted");
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    pub fn remove(&self, symbol: &Symbol) -> StoreResult<bool> {
        let removed = self.store.remove(symbol)?;
        self.entries.write().remove(symbol);
        if removed {
            info!(symbol = %symbol, "Symbol removed from blacklist");
        }
        Ok(removed)
    }

    #[must_use]
    pub fn all(&self) -> Vec<BlacklistEntry> {
        self.entries.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn is_critical(&self, code: i64) -> bool {
        self.critical_codes.contains(&code)
    }

    /// Blacklist `symbol` if `error` carries a critical code.
    ///
    /// Emits `BlacklistAdded` on insertion. A store failure is logged and
    /// reported as `false`; it never replaces the original error.
    pub fn apply_error_policy(&self, symbol: &Symbol, error: &ExchangeError) -> bool {
        let Some(code) = error.code().filter(|c| self.is_critical(*c)) else {
            return false;
        };
        match self.add(symbol, &error.to_string(), Some(code)) {
            Ok(Some(entry)) => {
                self.notifier
                    .notify(NotificationEvent::BlacklistAdded { entry });
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(symbol = %symbol, code, error = %e, "Failed to persist blacklist entry");
                false
            }
        }
    }
}
