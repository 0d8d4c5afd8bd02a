//! ExchangeClient retry, signing and error classification.

mod common;

use std::sync::Arc;
use std::time::Duration;

use carry_exchange::{
    Endpoint, ExchangeError, HttpResponse, MockTransport, RequestSigner, ApiCredentials,
    TransportError,
};
use serde_json::{json, Value};

use common::{client_with, API_KEY, API_SECRET};

const TIME: &str = "/v5/market/time";
const TICKERS: &str = "/v5/market/tickers";
const WALLET: &str = "/v5/account/wallet-balance";
const ORDER: &str = "/v5/order/create";

#[tokio::test(start_paused = true)]
async fn test_retries_5xx_then_succeeds() {
    let transport = Arc::new(MockTransport::new());
    transport.push(TICKERS, Ok(HttpResponse::status(502, "bad gateway")));
    transport.push_ok(TICKERS, json!({"list": []}));
    let client = client_with(Arc::clone(&transport));

    let result: Value = client
        .get_public(Endpoint::Tickers, &[("category", "spot".into())])
        .await
        .unwrap();

    assert_eq!(result["list"], json!([]));
    assert_eq!(transport.requests_to(TICKERS).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_transient_error() {
    let transport = Arc::new(MockTransport::new());
    transport.push(TICKERS, Err(TransportError::Timeout));
    let client = client_with(Arc::clone(&transport));

    let err = client
        .get_public::<Value>(Endpoint::Tickers, &[])
        .await
        .unwrap_err();

    match err {
        ExchangeError::Transient { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("expected transient error, got {other:?}"),
    }
    assert_eq!(transport.requests_to(TICKERS).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_ret_code_is_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ret_code(TICKERS, 10006, "Too many visits");
    transport.push_ok(TICKERS, json!({"list": []}));
    let client = client_with(Arc::clone(&transport));

    client
        .get_public::<Value>(Endpoint::Tickers, &[])
        .await
        .unwrap();
    assert_eq!(transport.requests_to(TICKERS).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_business_error_is_not_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ret_code(ORDER, 30228, "symbol is delisting");
    let client = client_with(Arc::clone(&transport));

    let err = tokio_test::assert_err!(
        client
            .post_signed::<Value>(Endpoint::OrderCreate, &json!({"symbol": "XUSDT"}))
            .await
    );

    assert_eq!(err.code(), Some(30228));
    assert_eq!(transport.requests_to(ORDER).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_http_4xx_is_not_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.push(WALLET, Ok(HttpResponse::status(401, "unauthorized")));
    let client = client_with(Arc::clone(&transport));

    let err = client
        .get_signed::<Value>(Endpoint::WalletBalance, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::HttpClient(_)));
    assert_eq!(transport.requests_to(WALLET).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_429_honors_retry_after() {
    let transport = Arc::new(MockTransport::new());
    transport.push(
        TICKERS,
        Ok(HttpResponse {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(3)),
        }),
    );
    transport.push_ok(TICKERS, json!({"list": []}));
    let client = client_with(Arc::clone(&transport));

    let start = tokio::time::Instant::now();
    client
        .get_public::<Value>(Endpoint::Tickers, &[])
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_timestamp_rejection_triggers_clock_resync() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ret_code(WALLET, 10002, "invalid request, please check your timestamp");
    transport.push_ok(WALLET, json!({"list": []}));
    transport.push_ok(
        TIME,
        json!({"timeSecond": "4102444800", "timeNano": "4102444800000000000"}),
    );
    let client = client_with(Arc::clone(&transport));

    client
        .get_signed::<Value>(Endpoint::WalletBalance, &[])
        .await
        .unwrap();

    assert_eq!(transport.requests_to(TIME).len(), 1);
    // Server time far in the future: offset must now be positive.
    assert!(client.clock().server_offset_ms() > 0);
}

#[tokio::test]
async fn test_signed_get_signs_exact_query() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(WALLET, json!({"list": []}));
    let client = client_with(Arc::clone(&transport));

    client
        .get_signed::<Value>(
            Endpoint::WalletBalance,
            &[("accountType", "UNIFIED".into()), ("coin", "BTC".into())],
        )
        .await
        .unwrap();

    let request = &transport.requests_to(WALLET)[0];
    assert_eq!(request.query, "accountType=UNIFIED&coin=BTC");
    assert_eq!(request.header("X-BAPI-API-KEY"), Some(API_KEY));
    assert_eq!(request.header("X-BAPI-RECV-WINDOW"), Some("5000"));

    let timestamp: u64 = request.header("X-BAPI-TIMESTAMP").unwrap().parse().unwrap();
    let reference = RequestSigner::new(ApiCredentials::new(API_KEY, API_SECRET), 5000);
    assert_eq!(
        request.header("X-BAPI-SIGN"),
        Some(reference.sign(timestamp, &request.query).as_str())
    );
}

#[tokio::test]
async fn test_signed_post_signs_body() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(ORDER, json!({"orderId": "1", "orderLinkId": "x"}));
    let client = client_with(Arc::clone(&transport));

    client
        .post_signed::<Value>(
            Endpoint::OrderCreate,
            &json!({"category": "linear", "symbol": "BTCUSDT"}),
        )
        .await
        .unwrap();

    let request = &transport.requests_to(ORDER)[0];
    let body = request.body.clone().unwrap();
    assert_eq!(body, r#"{"category":"linear","symbol":"BTCUSDT"}"#);

    let timestamp: u64 = request.header("X-BAPI-TIMESTAMP").unwrap().parse().unwrap();
    let reference = RequestSigner::new(ApiCredentials::new(API_KEY, API_SECRET), 5000);
    assert_eq!(
        request.header("X-BAPI-SIGN"),
        Some(reference.sign(timestamp, &body).as_str())
    );
}

#[tokio::test]
async fn test_public_requests_are_unsigned() {
    let transport = Arc::new(MockTransport::new());
    transport.push_ok(TICKERS, json!({"list": []}));
    let client = client_with(Arc::clone(&transport));

    client
        .get_public::<Value>(Endpoint::Tickers, &[])
        .await
        .unwrap();
    assert!(transport.requests_to(TICKERS)[0].headers.is_empty());
    assert_eq!(client.limiter().stats().total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_tracked_post_flags_unanswered_attempts() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Err(TransportError::Timeout));
    transport.push_ok(ORDER, json!({"orderId": "1"}));
    let client = client_with(Arc::clone(&transport));

    let tracked = client
        .post_signed_tracked::<Value>(Endpoint::OrderCreate, &json!({"symbol": "BTCUSDT"}))
        .await;

    assert!(tracked.ambiguous);
    assert_eq!(tracked.result.unwrap()["orderId"], "1");
}

#[tokio::test(start_paused = true)]
async fn test_tracked_post_throttle_is_not_ambiguous() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ORDER, Ok(HttpResponse::status(429, "slow down")));
    transport.push_ok(ORDER, json!({"orderId": "2"}));
    let client = client_with(Arc::clone(&transport));

    let tracked = client
        .post_signed_tracked::<Value>(Endpoint::OrderCreate, &json!({"symbol": "BTCUSDT"}))
        .await;

    assert!(!tracked.ambiguous);
    assert!(tracked.result.is_ok());
    assert_eq!(transport.requests_to(ORDER).len(), 2);
}
