//! Application wiring over a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;

use carry_bot::Application;
use carry_exchange::MockTransport;
use carry_persistence::JsonStore;
use carry_position::PositionStore;

use common::{position, symbol, test_config};

const TICKERS: &str = "/v5/market/tickers";
const TIME: &str = "/v5/market/time";

/// SOL, BTC and ETH all clear the default entry thresholds, in that order.
fn push_tickers(transport: &MockTransport) {
    transport.push_query(
        TICKERS,
        "category=spot",
        Ok(MockTransport::envelope(json!({"list": [
            {"symbol": "BTCUSDT", "bid1Price": "100", "ask1Price": "100"},
            {"symbol": "ETHUSDT", "bid1Price": "100", "ask1Price": "100"},
            {"symbol": "SOLUSDT", "bid1Price": "100", "ask1Price": "100"}
        ]}))),
    );
    transport.push_query(
        TICKERS,
        "category=linear",
        Ok(MockTransport::envelope(json!({"list": [
            {"symbol": "BTCUSDT", "bid1Price": "100.7", "ask1Price": "100.8", "fundingRate": "0.0003"},
            {"symbol": "ETHUSDT", "bid1Price": "100.6", "ask1Price": "100.7", "fundingRate": "0.0003"},
            {"symbol": "SOLUSDT", "bid1Price": "100.9", "ask1Price": "101.0", "fundingRate": "0.0005"}
        ]}))),
    );
}

fn queried(transport: &MockTransport, needle: &str) -> bool {
    transport.requests().iter().any(|r| r.query.contains(needle))
}

#[tokio::test]
async fn test_scan_skips_active_symbols_and_fills_free_slots() {
    let dir = tempfile::tempdir().unwrap();
    JsonStore::open(dir.path())
        .unwrap()
        .create(&position("SOLUSDT"))
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    push_tickers(&transport);
    let mut config = test_config(dir.path());
    config.concurrency.max_open_positions = 2;
    let app = Application::with_transport(config, transport.clone(), None, vec![]).unwrap();
    assert_eq!(app.supervisor().recover_on_boot().unwrap(), 1);

    let mut openers = JoinSet::new();
    let started = app.scan_once(&mut openers).await.unwrap();
    while openers.join_next().await.is_some() {}

    // One free slot: SOL is already open, so BTC is attempted and ETH is not.
    assert_eq!(started, 1);
    assert!(queried(&transport, "symbol=BTCUSDT"));
    assert!(!queried(&transport, "symbol=ETHUSDT"));
    // The attempt failed on unscripted endpoints and released its slot.
    assert!(app.manager().state(&symbol("BTCUSDT")).is_none());
    assert_eq!(app.manager().available_slots(), 1);

    app.supervisor().shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_scan_is_skipped_without_free_slots() {
    let dir = tempfile::tempdir().unwrap();
    JsonStore::open(dir.path())
        .unwrap()
        .create(&position("SOLUSDT"))
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    push_tickers(&transport);
    let app = Application::with_transport(test_config(dir.path()), transport.clone(), None, vec![])
        .unwrap();
    app.supervisor().recover_on_boot().unwrap();

    let mut openers = JoinSet::new();
    assert_eq!(app.scan_once(&mut openers).await.unwrap(), 0);
    assert!(transport.requests_to(TICKERS).iter().all(|r| r.query.contains("symbol=")));

    app.supervisor().shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_run_recovers_positions_and_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    JsonStore::open(dir.path())
        .unwrap()
        .create(&position("SOLUSDT"))
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    transport.push_ok(
        TIME,
        json!({"timeSecond": "1700000000", "timeNano": "1700000000000000000"}),
    );
    push_tickers(&transport);
    let app = Application::with_transport(test_config(dir.path()), transport.clone(), None, vec![])
        .unwrap();

    let token = app.shutdown_token();
    let supervisor = Arc::clone(app.supervisor());
    let sol = symbol("SOLUSDT");
    let stopper = async {
        while !supervisor.is_watching(&sol) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
    };

    let (result, ()) = tokio::join!(app.run(), stopper);
    result.unwrap();

    assert!(!supervisor.is_watching(&sol));
    assert_eq!(transport.requests_to(TIME).len(), 1);
    // Shutdown leaves stored positions for the next boot.
    let reopened = JsonStore::open(dir.path()).unwrap();
    assert_eq!(reopened.list_open().unwrap().len(), 1);
}
