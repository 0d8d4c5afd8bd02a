//! Scanner configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use carry_core::EntryThresholds;

use crate::error::{ScannerError, ScannerResult};

/// Admission thresholds and result size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Minimum entry spread in percent.
    #[serde(default = "default_min_entry_spread_pct")]
    pub min_entry_spread_pct: Decimal,
    /// Minimum funding rate in percent.
    #[serde(default = "default_min_funding_pct")]
    pub min_funding_pct: Decimal,
    /// Candidates returned per scan.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_min_entry_spread_pct() -> Decimal {
    EntryThresholds::default().min_spread_pct
}

fn default_min_funding_pct() -> Decimal {
    EntryThresholds::default().min_funding_pct
}

fn default_top_k() -> usize {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_entry_spread_pct: default_min_entry_spread_pct(),
            min_funding_pct: default_min_funding_pct(),
            top_k: default_top_k(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> ScannerResult<()> {
        if self.top_k == 0 {
            return Err(ScannerError::Config("top_k must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn thresholds(&self) -> EntryThresholds {
        EntryThresholds {
            min_spread_pct: self.min_entry_spread_pct,
            min_funding_pct: self.min_funding_pct,
        }
    }
}
