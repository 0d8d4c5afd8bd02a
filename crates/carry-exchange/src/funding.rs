//! Realized funding reconciliation.
//!
//! Funding settlements appear in the execution list with
//! `execType=Funding`. The API caps each query at seven days, so the
//! position lifetime is split into windows and each window is paged by
//! cursor. The exchange reports funding as a fee: income is `-execFee`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use carry_core::{Category, Symbol};

use crate::client::ExchangeClient;
use crate::error::ExchangeResult;
use crate::wire::{parse_decimal, Endpoint, ExecutionListResult, ExecutionRecord};

/// Longest range accepted by the execution-list endpoint.
pub const MAX_FUNDING_WINDOW_DAYS: i64 = 7;
const PAGE_LIMIT: &str = "100";
/// Hard stop for a misbehaving cursor.
const MAX_PAGES_PER_WINDOW: usize = 500;

/// Split `[from, to]` into consecutive inclusive windows of at most `window`.
///
/// The venue treats both bounds as inclusive, so each window starts one
/// millisecond after the previous one ends.
pub fn funding_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    window: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    if window <= Duration::zero() {
        return windows;
    }
    let mut start = from;
    while start < to {
        let end = (start + window).min(to);
        windows.push((start, end));
        start = end + Duration::milliseconds(1);
    }
    windows
}

/// Net funding income from settlement records (positive = received).
pub fn sum_funding_income<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Decimal {
    records
        .into_iter()
        .filter(|r| r.exec_type == "Funding")
        .filter_map(|r| parse_decimal(&r.exec_fee))
        .map(|fee| -fee)
        .sum()
}

/// Sums realized funding over a position lifetime.
pub struct FundingReconciler {
    client: Arc<ExchangeClient>,
    window: Duration,
}

impl FundingReconciler {
    pub fn new(client: Arc<ExchangeClient>) -> Self {
        Self {
            client,
            window: Duration::days(MAX_FUNDING_WINDOW_DAYS),
        }
    }

    /// Net funding received for `symbol` between `from` and `to`.
    pub async fn realized_funding(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ExchangeResult<Decimal> {
        let mut total = Decimal::ZERO;
        let mut records = 0usize;

        for (start, end) in funding_windows(from, to, self.window) {
            let mut cursor = String::new();
            for _ in 0..MAX_PAGES_PER_WINDOW {
                let mut params = vec![
                    ("category", Category::Linear.as_str().to_string()),
                    ("symbol", symbol.to_string()),
                    ("execType", "Funding".to_string()),
                    ("startTime", start.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                if !cursor.is_empty() {
                    params.push(("cursor", cursor.clone()));
                }

                let page: ExecutionListResult =
                    self.client.get_signed(Endpoint::ExecutionList, &params).await?;
                records += page.list.len();
                total += sum_funding_income(&page.list);
                debug!(%symbol, page_records = page.list.len(), %total, "Funding page");

                if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                    break;
                }
                cursor = page.next_page_cursor;
            }
        }

        info!(%symbol, records, funding = %total, "Funding reconciled");
        Ok(total)
    }
}
