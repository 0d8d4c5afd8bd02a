//! Market data, order execution and funding services over a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use carry_core::{Category, OrderSide, Price, Size, Symbol};
use carry_exchange::{
    ExchangeError, FillPolling, FundingReconciler, InstrumentCache, InstrumentInfo,
    MarketDataService, MockTransport, OrderExecutor, TransportError,
};

use common::client_with;

const ORDER: &str = "/v5/order/create";
const HISTORY: &str = "/v5/order/history";
const LEVERAGE: &str = "/v5/position/set-leverage";
const WALLET: &str = "/v5/account/wallet-balance";
const EXECUTIONS: &str = "/v5/execution/list";
const TICKERS: &str = "/v5/market/tickers";
const ORDERBOOK: &str = "/v5/market/orderbook";

fn btc() -> Symbol {
    Symbol::new("BTCUSDT").unwrap()
}

fn executor(transport: &Arc<MockTransport>) -> OrderExecutor {
    let client = client_with(Arc::clone(transport));
    let instruments = Arc::new(InstrumentCache::new(
        Arc::clone(&client),
        Duration::from_secs(3600),
    ));
    instruments.insert(
        btc(),
        Category::Linear,
        InstrumentInfo {
            qty_step: dec!(0.001),
            min_order_qty: dec!(0.001),
        },
    );
    instruments.insert(
        btc(),
        Category::Spot,
        InstrumentInfo {
            qty_step: dec!(0.000001),
            min_order_qty: dec!(0.000048),
        },
    );
    OrderExecutor::new(
        client,
        instruments,
        FillPolling {
            attempts: 3,
            interval: Duration::from_millis(10),
        },
    )
}

fn filled(order_id: &str, price: &str, qty: &str) -> Value {
    json!({"list": [{
        "orderId": order_id,
        "orderStatus": "Filled",
        "avgPrice": price,
        "cumExecQty": qty,
    }]})
}

fn body_of(transport: &MockTransport, path: &str, idx: usize) -> Value {
    let body = transport.requests_to(path)[idx].body.clone().unwrap();
    serde_json::from_str(&body).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_futures_order_rounds_and_confirms_fill() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "F1", "orderLinkId": "l"}));
    transport.push_ok(HISTORY, filled("F1", "50000.5", "0.012"));
    let orders = executor(&transport);

    let fill = orders
        .place_futures_order(&btc(), Size::new(dec!(0.01234)), OrderSide::Sell)
        .await
        .unwrap();

    assert_eq!(fill.order_id, "F1");
    assert_eq!(fill.avg_price, Price::new(dec!(50000.5)));
    assert_eq!(fill.qty, Size::new(dec!(0.012)));

    let body = body_of(&transport, ORDER, 0);
    assert_eq!(body["category"], "linear");
    assert_eq!(body["side"], "Sell");
    assert_eq!(body["qty"], "0.012");
    assert_eq!(body["reduceOnly"], false);
}

#[tokio::test(start_paused = true)]
async fn test_futures_order_below_minimum_never_submits() {
    let transport = Arc::new(MockTransport::new());
    let orders = executor(&transport);

    let err = orders
        .place_futures_order(&btc(), Size::new(dec!(0.0009)), OrderSide::Sell)
        .await
        .unwrap_err();

    assert!(err.is_precision());
    assert!(transport.requests_to(ORDER).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_futures_is_reduce_only_buy() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "F2"}));
    transport.push_ok(HISTORY, filled("F2", "49000", "0.012"));
    let orders = executor(&transport);

    orders
        .close_futures_position(&btc(), Size::new(dec!(0.012)))
        .await
        .unwrap();

    let body = body_of(&transport, ORDER, 0);
    assert_eq!(body["side"], "Buy");
    assert_eq!(body["reduceOnly"], true);
}

#[tokio::test(start_paused = true)]
async fn test_spot_order_is_sized_in_quote() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "S1"}));
    transport.push_ok(HISTORY, filled("S1", "50010", "0.000599"));
    let orders = executor(&transport);

    let fill = orders
        .place_spot_order(&btc(), dec!(29.999), OrderSide::Buy)
        .await
        .unwrap();

    assert_eq!(fill.qty, Size::new(dec!(0.000599)));
    let body = body_of(&transport, ORDER, 0);
    assert_eq!(body["category"], "spot");
    assert_eq!(body["marketUnit"], "quoteCoin");
    assert_eq!(body["qty"], "29.99");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_order_carries_exchange_code() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ret_code(ORDER, 30228, "symbol is delisting");
    let orders = executor(&transport);

    let err = orders
        .place_spot_order(&btc(), dec!(30), OrderSide::Buy)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::OrderRejected { code: Some(30228), .. }));
}

#[tokio::test(start_paused = true)]
async fn test_dead_order_is_rejection() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "S9"}));
    transport.push_ok(
        HISTORY,
        json!({"list": [{
            "orderId": "S9",
            "orderStatus": "Rejected",
            "avgPrice": "",
            "cumExecQty": "0",
            "rejectReason": "EC_NoImmediateQtyToFill",
        }]}),
    );
    let orders = executor(&transport);

    let err = orders
        .place_spot_order(&btc(), dec!(30), OrderSide::Buy)
        .await
        .unwrap_err();
    match err {
        ExchangeError::OrderRejected { reason, .. } => {
            assert_eq!(reason, "EC_NoImmediateQtyToFill")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_fill_is_reported() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "F3"}));
    transport.push_ok(HISTORY, json!({"list": []}));
    let orders = executor(&transport);

    let err = orders
        .place_futures_order(&btc(), Size::new(dec!(0.01)), OrderSide::Sell)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::FillUnconfirmed { .. }));
    assert_eq!(transport.requests_to(HISTORY).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_link_id_after_timeout_resolves_to_live_order() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Err(TransportError::Timeout));
    transport.push_ret_code(ORDER, 110072, "OrderLinkedID is duplicate");
    transport.push_ok(HISTORY, filled("F7", "50100", "0.01"));
    let orders = executor(&transport);

    let fill = orders
        .place_futures_order(&btc(), Size::new(dec!(0.01)), OrderSide::Sell)
        .await
        .unwrap();

    assert_eq!(fill.order_id, "F7");
    assert_eq!(fill.qty, Size::new(dec!(0.01)));
    let link_id = body_of(&transport, ORDER, 0)["orderLinkId"].clone();
    assert_eq!(body_of(&transport, ORDER, 1)["orderLinkId"], link_id);
    let lookup = &transport.requests_to(HISTORY)[0];
    assert!(lookup
        .query
        .ends_with(&format!("orderLinkId={}", link_id.as_str().unwrap())));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_link_id_without_record_is_unconfirmed() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Err(TransportError::Timeout));
    transport.push_ret_code(ORDER, 110072, "OrderLinkedID is duplicate");
    transport.push_ok(HISTORY, json!({"list": []}));
    let orders = executor(&transport);

    let err = orders
        .place_futures_order(&btc(), Size::new(dec!(0.01)), OrderSide::Sell)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::FillUnconfirmed { .. }));
    assert_eq!(transport.requests_to(HISTORY).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_after_timeout_is_checked_before_reporting() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Err(TransportError::Timeout));
    transport.push_ret_code(ORDER, 170131, "Insufficient balance");
    transport.push_ok(HISTORY, json!({"list": []}));
    let orders = executor(&transport);

    let err = orders
        .place_spot_order(&btc(), dec!(30), OrderSide::Buy)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::OrderRejected { code: Some(170131), .. }));
    assert!(!transport.requests_to(HISTORY).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_lookup_failure_is_unconfirmed() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Err(TransportError::Timeout));
    // No history route: every lookup fails.
    let orders = executor(&transport);

    let err = orders
        .place_futures_order(&btc(), Size::new(dec!(0.01)), OrderSide::Sell)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::FillUnconfirmed { .. }));
    assert_eq!(transport.requests_to(ORDER).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_spot_close_sells_live_balance() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(
        WALLET,
        json!({"list": [{"coin": [
            {"coin": "BTC", "walletBalance": "0.0005989", "availableToWithdraw": "0.0005989"}
        ]}]}),
    );
    transport.push_ok(ORDER, json!({"orderId": "S2"}));
    transport.push_ok(HISTORY, filled("S2", "51000", "0.000598"));
    let orders = executor(&transport);

    orders.close_spot_position_by_balance(&btc()).await.unwrap();

    let wallet = &transport.requests_to(WALLET)[0];
    assert_eq!(wallet.query, "accountType=UNIFIED&coin=BTC");
    let body = body_of(&transport, ORDER, 0);
    assert_eq!(body["side"], "Sell");
    assert_eq!(body["marketUnit"], "baseCoin");
    assert_eq!(body["qty"], "0.000598");
}

#[tokio::test(start_paused = true)]
async fn test_leverage_not_modified_is_success() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ret_code(LEVERAGE, 110043, "leverage not modified");
    let orders = executor(&transport);

    orders.set_leverage(&btc(), 1).await.unwrap();
    let body = body_of(&transport, LEVERAGE, 0);
    assert_eq!(body["buyLeverage"], "1");
}

#[tokio::test(start_paused = true)]
async fn test_futures_qty_bumps_to_minimum_value() {
    let transport = Arc::new(MockTransport::new());
    let orders = executor(&transport);

    // 0.001 BTC at 50000 is worth 50 USDT, above the 30 USDT notional.
    let qty = orders
        .futures_qty_for_notional(&btc(), dec!(30), Price::new(dec!(50000)))
        .await
        .unwrap();
    assert_eq!(qty, Size::new(dec!(0.001)));

    let qty = orders
        .futures_qty_for_notional(&btc(), dec!(1000), Price::new(dec!(50000)))
        .await
        .unwrap();
    assert_eq!(qty, Size::new(dec!(0.02)));
}

#[tokio::test(start_paused = true)]
async fn test_funding_follows_cursor_and_negates_fees() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(
        EXECUTIONS,
        json!({"list": [
            {"symbol": "BTCUSDT", "execType": "Funding", "execFee": "-0.10"},
            {"symbol": "BTCUSDT", "execType": "Funding", "execFee": "-0.05"}
        ], "nextPageCursor": "page2"}),
    );
    transport.push_ok(
        EXECUTIONS,
        json!({"list": [
            {"symbol": "BTCUSDT", "execType": "Funding", "execFee": "0.02"}
        ], "nextPageCursor": ""}),
    );
    let reconciler = FundingReconciler::new(client_with(Arc::clone(&transport)));

    let to = Utc::now();
    let total = reconciler
        .realized_funding(&btc(), to - ChronoDuration::days(2), to)
        .await
        .unwrap();

    assert_eq!(total, dec!(0.13));
    let requests = transport.requests_to(EXECUTIONS);
    assert_eq!(requests.len(), 2);
    assert!(requests[1].query.ends_with("cursor=page2"));
}

#[tokio::test(start_paused = true)]
async fn test_funding_splits_long_lifetimes_into_windows() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(
        EXECUTIONS,
        json!({"list": [{"symbol": "BTCUSDT", "execType": "Funding", "execFee": "-1"}], "nextPageCursor": ""}),
    );
    let reconciler = FundingReconciler::new(client_with(Arc::clone(&transport)));

    let to = Utc::now();
    let total = reconciler
        .realized_funding(&btc(), to - ChronoDuration::days(20), to)
        .await
        .unwrap();

    // Three windows, each returning the same page.
    assert_eq!(transport.requests_to(EXECUTIONS).len(), 3);
    assert_eq!(total, dec!(3));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_quotes_join_books_and_scale_funding() {
    let transport = Arc::new(MockTransport::new());
    transport.push_query(
        TICKERS,
        "category=spot",
        Ok(MockTransport::envelope(json!({"list": [
            {"symbol": "BTCUSDT", "bid1Price": "100", "ask1Price": "100.1"},
            {"symbol": "SPOTONLYUSDT", "bid1Price": "1", "ask1Price": "1.1"}
        ]}))),
    );
    transport.push_query(
        TICKERS,
        "category=linear",
        Ok(MockTransport::envelope(json!({"list": [
            {"symbol": "BTCUSDT", "bid1Price": "100.6", "ask1Price": "100.7", "fundingRate": "0.0003"}
        ]}))),
    );
    let market = MarketDataService::new(client_with(Arc::clone(&transport)));

    let quotes = market.bulk_quotes().await.unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].symbol, btc());
    assert_eq!(quotes[0].funding_rate_pct, dec!(0.03));
}

#[tokio::test(start_paused = true)]
async fn test_top_of_book_reads_first_level() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(
        ORDERBOOK,
        json!({"s": "BTCUSDT", "b": [["100.5", "2"]], "a": [["100.6", "1"]]}),
    );
    let market = MarketDataService::new(client_with(Arc::clone(&transport)));

    let bbo = market.top_of_book(&btc(), Category::Linear).await.unwrap();
    assert_eq!(bbo.bid, Price::new(dec!(100.5)));
    assert_eq!(bbo.ask, Price::new(dec!(100.6)));
    assert!(transport.requests_to(ORDERBOOK)[0]
        .query
        .contains("category=linear"));
}
