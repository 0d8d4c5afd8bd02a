//! Market order placement with instrument-precision rounding.
//!
//! Spot buys and sells are sized in quote notional (`marketUnit=quoteCoin`),
//! except the close-by-balance sale which sells the held base quantity.
//! Futures orders are sized in base units; closes are reduce-only.
//! After submission each order is confirmed against order history to
//! obtain the average fill price and executed quantity.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use carry_core::{Category, OrderSide, Price, Size, Symbol};

use crate::client::{ExchangeClient, Tracked};
use crate::error::{ExchangeError, ExchangeResult};
use crate::instruments::InstrumentCache;
use crate::wire::{
    parse_decimal, ret_code, Endpoint, OrderCreateResult, OrderHistoryResult, OrderRecord,
    WalletBalanceResult,
};

/// Executed market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFill {
    pub order_id: String,
    pub avg_price: Price,
    pub qty: Size,
}

/// Fill confirmation polling.
#[derive(Debug, Clone, Copy)]
pub struct FillPolling {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for FillPolling {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(300),
        }
    }
}

/// Truncate `qty` to `step`; error if the result falls below `min`.
pub fn round_to_step(symbol: &Symbol, qty: Size, step: Decimal, min: Decimal) -> ExchangeResult<Size> {
    qty.round_to_step(step, min)
        .map_err(|e| ExchangeError::Precision {
            symbol: symbol.to_string(),
            message: e.to_string(),
        })
}

/// Places and closes spot and futures legs.
pub struct OrderExecutor {
    client: Arc<ExchangeClient>,
    instruments: Arc<InstrumentCache>,
    polling: FillPolling,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<ExchangeClient>,
        instruments: Arc<InstrumentCache>,
        polling: FillPolling,
    ) -> Self {
        Self {
            client,
            instruments,
            polling,
        }
    }

    #[must_use]
    pub fn instruments(&self) -> &Arc<InstrumentCache> {
        &self.instruments
    }

    /// Set symmetric leverage on the linear contract.
    ///
    /// "Leverage not modified" counts as success.
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> ExchangeResult<()> {
        let body = json!({
            "category": Category::Linear.as_str(),
            "symbol": symbol.as_str(),
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self
            .client
            .post_signed::<serde_json::Value>(Endpoint::SetLeverage, &body)
            .await
        {
            Ok(_) => {
                info!(%symbol, leverage, "Leverage set");
                Ok(())
            }
            Err(ExchangeError::Api { code, .. }) if code == ret_code::LEVERAGE_NOT_MODIFIED => {
                debug!(%symbol, leverage, "Leverage already set");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Market spot order sized in USDT notional.
    pub async fn place_spot_order(
        &self,
        symbol: &Symbol,
        notional_usd: Decimal,
        side: OrderSide,
    ) -> ExchangeResult<OrderFill> {
        let notional = notional_usd.round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if notional <= Decimal::ZERO {
            return Err(ExchangeError::Precision {
                symbol: symbol.to_string(),
                message: format!("notional {notional_usd} rounds to zero"),
            });
        }
        let body = json!({
            "category": Category::Spot.as_str(),
            "symbol": symbol.as_str(),
            "side": side.as_str(),
            "orderType": "Market",
            "qty": notional.to_string(),
            "marketUnit": "quoteCoin",
            "timeInForce": "IOC",
            "orderLinkId": new_link_id(),
        });
        info!(%symbol, %side, %notional, "Placing spot order");
        self.submit_and_confirm(symbol, Category::Spot, body).await
    }

    /// Market futures order sized in base units.
    pub async fn place_futures_order(
        &self,
        symbol: &Symbol,
        qty: Size,
        side: OrderSide,
    ) -> ExchangeResult<OrderFill> {
        self.futures_order(symbol, qty, side, false).await
    }

    /// Sell the live spot balance of the base coin.
    ///
    /// Uses the wallet balance rather than the stored quantity, since spot
    /// buy fees are charged in the base coin.
    pub async fn close_spot_position_by_balance(&self, symbol: &Symbol) -> ExchangeResult<OrderFill> {
        let balance = self.coin_balance(symbol.base_coin()).await?;
        let info = self.instruments.get(symbol, Category::Spot).await?;
        let qty = round_to_step(symbol, Size::new(balance), info.qty_step, info.min_order_qty)?;

        let body = json!({
            "category": Category::Spot.as_str(),
            "symbol": symbol.as_str(),
            "side": OrderSide::Sell.as_str(),
            "orderType": "Market",
            "qty": qty.to_string(),
            "marketUnit": "baseCoin",
            "timeInForce": "IOC",
            "orderLinkId": new_link_id(),
        });
        info!(%symbol, %balance, %qty, "Selling spot balance");
        self.submit_and_confirm(symbol, Category::Spot, body).await
    }

    /// Reduce-only buy closing a futures short of `qty`.
    pub async fn close_futures_position(&self, symbol: &Symbol, qty: Size) -> ExchangeResult<OrderFill> {
        self.futures_order(symbol, qty, OrderSide::Buy, true).await
    }

    /// Futures quantity for a notional at `price`, rounded to the step.
    ///
    /// If the instrument minimum is worth more than `notional_usd`, the
    /// minimum quantity is used instead.
    pub async fn futures_qty_for_notional(
        &self,
        symbol: &Symbol,
        notional_usd: Decimal,
        price: Price,
    ) -> ExchangeResult<Size> {
        if !price.is_positive() {
            return Err(ExchangeError::Precision {
                symbol: symbol.to_string(),
                message: format!("non-positive price {price}"),
            });
        }
        let info = self.instruments.get(symbol, Category::Linear).await?;
        let min_value = info.min_order_qty * price.inner();
        if min_value > notional_usd {
            warn!(
                %symbol,
                %notional_usd,
                %min_value,
                "Notional below instrument minimum, using minimum order size"
            );
            return round_to_step(
                symbol,
                Size::new(info.min_order_qty),
                info.qty_step,
                info.min_order_qty,
            );
        }
        round_to_step(
            symbol,
            Size::new(notional_usd / price.inner()),
            info.qty_step,
            info.min_order_qty,
        )
    }

    /// Available balance of a coin in the unified account.
    pub async fn coin_balance(&self, coin: &str) -> ExchangeResult<Decimal> {
        let result: WalletBalanceResult = self
            .client
            .get_signed(
                Endpoint::WalletBalance,
                &[
                    ("accountType", "UNIFIED".to_string()),
                    ("coin", coin.to_string()),
                ],
            )
            .await?;
        result
            .list
            .iter()
            .flat_map(|acct| acct.coin.iter())
            .find(|c| c.coin == coin)
            .map(|c| c.available())
            .ok_or_else(|| ExchangeError::NotFound(format!("{coin} balance")))
    }

    async fn futures_order(
        &self,
        symbol: &Symbol,
        qty: Size,
        side: OrderSide,
        reduce_only: bool,
    ) -> ExchangeResult<OrderFill> {
        let info = self.instruments.get(symbol, Category::Linear).await?;
        let qty = round_to_step(symbol, qty, info.qty_step, info.min_order_qty)?;

        let body = json!({
            "category": Category::Linear.as_str(),
            "symbol": symbol.as_str(),
            "side": side.as_str(),
            "orderType": "Market",
            "qty": qty.to_string(),
            "timeInForce": "IOC",
            "positionIdx": 0,
            "reduceOnly": reduce_only,
            "orderLinkId": new_link_id(),
        });
        info!(%symbol, %side, %qty, reduce_only, "Placing futures order");
        self.submit_and_confirm(symbol, Category::Linear, body).await
    }

    async fn submit_and_confirm(
        &self,
        symbol: &Symbol,
        category: Category,
        body: serde_json::Value,
    ) -> ExchangeResult<OrderFill> {
        let link_id = body["orderLinkId"].as_str().unwrap_or_default().to_string();

        let Tracked { result, ambiguous } = self
            .client
            .post_signed_tracked::<OrderCreateResult>(Endpoint::OrderCreate, &body)
            .await;

        let order_id = match result {
            Ok(created) => created.order_id,
            Err(e)
                if ambiguous
                    || matches!(e, ExchangeError::Transient { .. })
                    || e.code() == Some(ret_code::ORDER_LINK_ID_DUPLICATE) =>
            {
                self.resolve_unanswered_create(symbol, category, &link_id, e)
                    .await?
            }
            Err(ExchangeError::Api { code, message }) => {
                warn!(%symbol, %category, code, %message, "Order rejected");
                return Err(ExchangeError::OrderRejected {
                    code: Some(code),
                    reason: message,
                });
            }
            Err(e) => return Err(e),
        };

        self.confirm_fill(symbol, category, &order_id).await
    }

    /// Find an order by link id after a create that may have reached the book.
    ///
    /// A lookup that answers "no such order" returns the create error; one
    /// that never answers, or a duplicate-link-id rejection with no record,
    /// returns `FillUnconfirmed`.
    async fn resolve_unanswered_create(
        &self,
        symbol: &Symbol,
        category: Category,
        link_id: &str,
        create_error: ExchangeError,
    ) -> ExchangeResult<String> {
        let duplicate = create_error.code() == Some(ret_code::ORDER_LINK_ID_DUPLICATE);
        let mut absent = false;

        for attempt in 0..self.polling.attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.polling.interval).await;
            }
            match self.order_record(category, "orderLinkId", link_id).await {
                Ok(Some(record)) => {
                    warn!(
                        %symbol,
                        %category,
                        order_id = %record.order_id,
                        error = %create_error,
                        "Order found after unanswered create"
                    );
                    return Ok(record.order_id);
                }
                Ok(None) => absent = true,
                Err(e) => debug!(%symbol, link_id, error = %e, "Order lookup by link id failed"),
            }
        }

        if absent && !duplicate {
            return Err(match create_error {
                ExchangeError::Api { code, message } => ExchangeError::OrderRejected {
                    code: Some(code),
                    reason: message,
                },
                e => e,
            });
        }
        error!(%symbol, %category, link_id, error = %create_error, "Order outcome unknown");
        Err(ExchangeError::FillUnconfirmed {
            order_id: link_id.to_string(),
        })
    }

    async fn confirm_fill(
        &self,
        symbol: &Symbol,
        category: Category,
        order_id: &str,
    ) -> ExchangeResult<OrderFill> {
        for attempt in 0..self.polling.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.polling.interval).await;
            }
            let record = match self.order_record(category, "orderId", order_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    debug!(%symbol, order_id, error = %e, "Order history lookup failed");
                    continue;
                }
            };

            if record.is_dead() {
                let reason = if record.reject_reason.is_empty() {
                    record.order_status.clone()
                } else {
                    record.reject_reason.clone()
                };
                return Err(ExchangeError::OrderRejected { code: None, reason });
            }
            if record.is_filled() {
                let (Some(price), Some(qty)) = (
                    parse_decimal(&record.avg_price),
                    parse_decimal(&record.cum_exec_qty),
                ) else {
                    continue;
                };
                info!(%symbol, %category, order_id, avg_price = %price, %qty, "Order filled");
                return Ok(OrderFill {
                    order_id: order_id.to_string(),
                    avg_price: Price::new(price),
                    qty: Size::new(qty),
                });
            }
        }

        Err(ExchangeError::FillUnconfirmed {
            order_id: order_id.to_string(),
        })
    }

    async fn order_record(
        &self,
        category: Category,
        key: &'static str,
        id: &str,
    ) -> ExchangeResult<Option<OrderRecord>> {
        let history: OrderHistoryResult = self
            .client
            .get_signed(
                Endpoint::OrderHistory,
                &[
                    ("category", category.as_str().to_string()),
                    (key, id.to_string()),
                ],
            )
            .await?;
        Ok(history.list.into_iter().next())
    }
}

/// Client order id; the venue caps it at 36 characters.
fn new_link_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_step_maps_to_precision_error() {
        let symbol = Symbol::new("BTCUSDT").unwrap();
        let err = round_to_step(&symbol, Size::new(dec!(0.0004)), dec!(0.001), dec!(0.001))
            .unwrap_err();
        assert!(err.is_precision());

        let ok = round_to_step(&symbol, Size::new(dec!(0.0129)), dec!(0.001), dec!(0.001)).unwrap();
        assert_eq!(ok.inner(), dec!(0.012));
    }

    #[test]
    fn test_link_ids_are_unique() {
        assert_ne!(new_link_id(), new_link_id());
        assert!(new_link_id().len() <= 36);
    }
}
