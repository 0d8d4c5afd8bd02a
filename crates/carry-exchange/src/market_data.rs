//! Orderbook, ticker and funding-rate queries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use carry_core::{Bbo, Category, MarketQuote, Price, Symbol};

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::{
    parse_decimal, Endpoint, InstrumentsResult, OrderbookResult, TickerItem, TickersResult,
};

/// Read-only market data.
pub struct MarketDataService {
    client: Arc<ExchangeClient>,
}

impl MarketDataService {
    pub fn new(client: Arc<ExchangeClient>) -> Self {
        Self { client }
    }

    /// Best bid/ask from a depth-1 orderbook.
    pub async fn top_of_book(&self, symbol: &Symbol, category: Category) -> ExchangeResult<Bbo> {
        let book: OrderbookResult = self
            .client
            .get_public(
                Endpoint::Orderbook,
                &[
                    ("category", category.as_str().to_string()),
                    ("symbol", symbol.to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let level = |levels: &[[String; 2]]| levels.first().and_then(|l| parse_decimal(&l[0]));
        match (level(&book.b), level(&book.a)) {
            (Some(bid), Some(ask)) => Ok(Bbo::new(Price::new(bid), Price::new(ask))),
            _ => Err(ExchangeError::NotFound(format!(
                "empty {category} orderbook for {symbol}"
            ))),
        }
    }

    /// Current funding rate in percent (fraction × 100).
    pub async fn funding_rate_pct(&self, symbol: &Symbol) -> ExchangeResult<Decimal> {
        let tickers: TickersResult = self
            .client
            .get_public(
                Endpoint::Tickers,
                &[
                    ("category", Category::Linear.as_str().to_string()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;
        tickers
            .list
            .iter()
            .find(|t| t.symbol == symbol.as_str())
            .and_then(|t| parse_decimal(&t.funding_rate))
            .map(|rate| rate * Decimal::ONE_HUNDRED)
            .ok_or_else(|| ExchangeError::NotFound(format!("funding rate for {symbol}")))
    }

    /// Live quote for one symbol from both orderbooks plus funding.
    pub async fn quote(&self, symbol: &Symbol) -> ExchangeResult<MarketQuote> {
        let (spot, futures, funding) = tokio::try_join!(
            self.top_of_book(symbol, Category::Spot),
            self.top_of_book(symbol, Category::Linear),
            self.funding_rate_pct(symbol),
        )?;
        Ok(MarketQuote {
            symbol: symbol.clone(),
            spot,
            futures,
            funding_rate_pct: funding,
        })
    }

    /// All tickers for a category keyed by symbol.
    pub async fn tickers(&self, category: Category) -> ExchangeResult<HashMap<String, TickerItem>> {
        let tickers: TickersResult = self
            .client
            .get_public(
                Endpoint::Tickers,
                &[("category", category.as_str().to_string())],
            )
            .await?;
        Ok(tickers
            .list
            .into_iter()
            .map(|t| (t.symbol.clone(), t))
            .collect())
    }

    /// Quotes for every symbol listed on both books, from two bulk ticker calls.
    ///
    /// Symbols with a missing side or funding rate are skipped.
    pub async fn bulk_quotes(&self) -> ExchangeResult<Vec<MarketQuote>> {
        let (spot, linear) =
            tokio::try_join!(self.tickers(Category::Spot), self.tickers(Category::Linear))?;

        let mut quotes = Vec::new();
        for (name, fut) in &linear {
            let Some(sp) = spot.get(name) else { continue };
            let Ok(symbol) = Symbol::new(name) else {
                continue;
            };
            let parsed = (
                parse_decimal(&sp.bid1_price),
                parse_decimal(&sp.ask1_price),
                parse_decimal(&fut.bid1_price),
                parse_decimal(&fut.ask1_price),
                parse_decimal(&fut.funding_rate),
            );
            let (Some(sb), Some(sa), Some(fb), Some(fa), Some(fr)) = parsed else {
                debug!(symbol = %name, "Skipping incomplete ticker");
                continue;
            };
            let quote = MarketQuote {
                symbol,
                spot: Bbo::new(Price::new(sb), Price::new(sa)),
                futures: Bbo::new(Price::new(fb), Price::new(fa)),
                funding_rate_pct: fr * Decimal::ONE_HUNDRED,
            };
            if quote.is_valid() {
                quotes.push(quote);
            }
        }
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(quotes)
    }

    /// USDT pairs trading on both the spot and linear books.
    pub async fn tradable_symbols(&self) -> ExchangeResult<Vec<Symbol>> {
        let (spot, linear) = tokio::try_join!(
            self.trading_instruments(Category::Spot),
            self.trading_instruments(Category::Linear)
        )?;
        Ok(spot
            .intersection(&linear)
            .filter(|s| s.ends_with("USDT"))
            .filter_map(|s| Symbol::new(s).ok())
            .collect())
    }

    async fn trading_instruments(&self, category: Category) -> ExchangeResult<BTreeSet<String>> {
        let mut symbols = BTreeSet::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("category", category.as_str().to_string()),
                ("limit", "1000".to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let page: InstrumentsResult =
                self.client.get_public(Endpoint::InstrumentsInfo, &params).await?;
            symbols.extend(
                page.list
                    .into_iter()
                    .filter(|i| i.status == "Trading")
                    .map(|i| i.symbol),
            );
            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                break;
            }
            cursor = page.next_page_cursor;
        }
        if symbols.is_empty() {
            warn!(%category, "No trading instruments returned");
        }
        Ok(symbols)
    }

    /// Server time sync passthrough.
    pub async fn sync_server_time(&self) -> ExchangeResult<i64> {
        self.client.sync_time().await
    }
}
