//! Rate-limited, signed REST access to the venue.
//!
//! Layers, leaf first:
//! - `RateLimiter`: rolling one-second request and weight limits shared by all calls
//! - `ServerClock`, `RequestSigner`: skew-corrected timestamps and HMAC signing
//! - `ExchangeClient`: signing, timeout and capped-backoff retry over a `Transport`
//! - `MarketDataService`, `OrderExecutor`, `FundingReconciler`: endpoint services
//! - `Venue`: the seam the position lifecycle consumes

pub mod client;
pub mod clock;
pub mod error;
pub mod funding;
pub mod instruments;
pub mod market_data;
pub mod orders;
pub mod rate_limiter;
pub mod signer;
pub mod transport;
pub mod venue;
pub mod wire;

pub use client::{ClientConfig, ExchangeClient, Tracked};
pub use clock::{Clock, ServerClock, SystemClock};
pub use error::{ExchangeError, ExchangeResult};
pub use funding::{funding_windows, FundingReconciler, MAX_FUNDING_WINDOW_DAYS};
pub use instruments::{InstrumentCache, InstrumentInfo};
pub use market_data::MarketDataService;
pub use orders::{round_to_step, FillPolling, OrderExecutor, OrderFill};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats, RATE_WINDOW};
pub use signer::{ApiCredentials, KeySource, RequestSigner};
pub use transport::{
    BoxFuture, DynTransport, HttpMethod, HttpRequest, HttpResponse, MockTransport,
    ReqwestTransport, Transport, TransportError,
};
pub use venue::{BybitVenue, DynVenue, Venue};
pub use wire::{ret_code, Endpoint};
