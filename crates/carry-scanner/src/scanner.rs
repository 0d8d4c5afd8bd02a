//! Opportunity ranking over a market snapshot.

use rust_decimal::Decimal;
use tracing::{debug, info};

use carry_core::{EntryThresholds, MarketQuote, Symbol};
use carry_exchange::Venue;
use carry_telemetry::Metrics;

use crate::config::ScannerConfig;
use crate::error::ScannerResult;

/// Admitted symbol with its entry spread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub quote: MarketQuote,
    pub entry_spread_pct: Decimal,
}

impl Candidate {
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.quote.symbol
    }
}

pub struct OpportunityScanner {
    config: ScannerConfig,
    thresholds: EntryThresholds,
}

impl OpportunityScanner {
    pub fn new(config: ScannerConfig) -> ScannerResult<Self> {
        config.validate()?;
        let thresholds = config.thresholds();
        Ok(Self { config, thresholds })
    }

    #[must_use]
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Filter and rank `snapshot`.
    ///
    /// Drops excluded symbols and quotes below either threshold, sorts by
    /// entry spread descending (funding, then symbol, break ties) and keeps
    /// the top `top_k`.
    pub fn rank<F>(&self, snapshot: Vec<MarketQuote>, is_excluded: F) -> Vec<Candidate>
    where
        F: Fn(&Symbol) -> bool,
    {
        let mut candidates: Vec<Candidate> = snapshot
            .into_iter()
            .filter(|q| !is_excluded(&q.symbol))
            .filter(|q| self.thresholds.admits(q))
            .filter_map(|quote| {
                let entry_spread_pct = quote.entry_spread_pct()?;
                Some(Candidate {
                    quote,
                    entry_spread_pct,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.entry_spread_pct
                .cmp(&a.entry_spread_pct)
                .then_with(|| b.quote.funding_rate_pct.cmp(&a.quote.funding_rate_pct))
                .then_with(|| a.symbol().cmp(b.symbol()))
        });
        candidates.truncate(self.config.top_k);
        candidates
    }

    /// Fetch a snapshot from `venue` and rank it.
    pub async fn scan<F>(&self, venue: &dyn Venue, is_excluded: F) -> ScannerResult<Vec<Candidate>>
    where
        F: Fn(&Symbol) -> bool,
    {
        let snapshot = venue.market_snapshot().await?;
        let scanned = snapshot.len();
        let candidates = self.rank(snapshot, is_excluded);

        Metrics::scan_candidates(candidates.len());
        info!(scanned, admitted = candidates.len(), "Scan complete");
        for c in &candidates {
            debug!(
                symbol = %c.symbol(),
                spread_pct = %c.entry_spread_pct,
                funding_pct = %c.quote.funding_rate_pct,
                "Candidate"
            );
        }
        Ok(candidates)
    }
}
