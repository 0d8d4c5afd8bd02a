//! Shared fixtures for exchange integration tests.

use std::sync::Arc;
use std::time::Duration;

use carry_exchange::{
    ApiCredentials, ClientConfig, ExchangeClient, MockTransport, RateLimiter, RateLimiterConfig,
    RequestSigner, ServerClock,
};

pub const API_KEY: &str = "test-key";
pub const API_SECRET: &str = "test-secret";

/// Client over a scripted transport with fast backoff.
pub fn client_with(transport: Arc<MockTransport>) -> Arc<ExchangeClient> {
    let signer = RequestSigner::new(ApiCredentials::new(API_KEY, API_SECRET), 5000);
    Arc::new(ExchangeClient::new(
        transport,
        Arc::new(RateLimiter::new(RateLimiterConfig::per_second(50, 300))),
        Arc::new(ServerClock::default()),
        Some(signer),
        ClientConfig {
            request_timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(800),
        },
    ))
}
