//! Application configuration.
//!
//! Loaded from a TOML file and layered with `CARRY__`-prefixed environment
//! overrides (`CARRY__TRADING__LEVERAGE=2`). Credentials are never read
//! from the file; `exchange.credentials` only names where to find them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use carry_core::EntryThresholds;
use carry_exchange::{ClientConfig, FillPolling, KeySource, RateLimiterConfig};
use carry_position::{ExitThresholds, LifecycleConfig, DEFAULT_CRITICAL_CODES};
use carry_scanner::ScannerConfig;

use crate::error::{AppError, AppResult};

/// Environment override prefix.
pub const ENV_PREFIX: &str = "CARRY";
/// Separator between prefix and nested keys.
pub const ENV_SEPARATOR: &str = "__";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Milliseconds a signed request stays valid on the server.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Order-history polls before a fill is declared unconfirmed.
    #[serde(default = "default_fill_poll_attempts")]
    pub fill_poll_attempts: u32,
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,
    #[serde(default = "default_instrument_ttl_secs")]
    pub instrument_ttl_secs: u64,
    #[serde(default)]
    pub credentials: KeySource,
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_fill_poll_attempts() -> u32 {
    5
}

fn default_fill_poll_interval_ms() -> u64 {
    300
}

fn default_instrument_ttl_secs() -> u64 {
    3_600
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            recv_window_ms: default_recv_window_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            fill_poll_attempts: default_fill_poll_attempts(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            instrument_ttl_secs: default_instrument_ttl_secs(),
            credentials: KeySource::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,
    #[serde(default = "default_weight_per_sec")]
    pub weight_per_sec: u32,
}

fn default_requests_per_sec() -> u32 {
    50
}

fn default_weight_per_sec() -> u32 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: default_requests_per_sec(),
            weight_per_sec: default_weight_per_sec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Notional per position in USDT.
    #[serde(default = "default_trade_notional_usd")]
    pub trade_notional_usd: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Round-trip commission in percent of notional.
    #[serde(default = "default_commission_rate_pct")]
    pub commission_rate_pct: Decimal,
}

fn default_trade_notional_usd() -> Decimal {
    Decimal::from(30)
}

fn default_leverage() -> u32 {
    1
}

fn default_commission_rate_pct() -> Decimal {
    Decimal::new(27, 2)
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            trade_notional_usd: default_trade_notional_usd(),
            leverage: default_leverage(),
            commission_rate_pct: default_commission_rate_pct(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default)]
    pub entry: EntryThresholds,
    #[serde(default)]
    pub exit: ExitThresholds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Concurrent opening attempts.
    #[serde(default = "default_opener_workers")]
    pub opener_workers: usize,
    /// Candidates kept per scan.
    #[serde(default = "default_scan_top_k")]
    pub scan_top_k: usize,
}

fn default_max_open_positions() -> usize {
    1
}

fn default_opener_workers() -> usize {
    3
}

fn default_scan_top_k() -> usize {
    10
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            opener_workers: default_opener_workers(),
            scan_top_k: default_scan_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalsConfig {
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
    #[serde(default = "default_monitor_secs")]
    pub monitor_secs: u64,
    #[serde(default = "default_time_sync_secs")]
    pub time_sync_secs: u64,
    /// Wait for monitors and openers after Ctrl-C.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_scan_secs() -> u64 {
    180
}

fn default_monitor_secs() -> u64 {
    300
}

fn default_time_sync_secs() -> u64 {
    3_600
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            scan_secs: default_scan_secs(),
            monitor_secs: default_monitor_secs(),
            time_sync_secs: default_time_sync_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistConfig {
    /// Exchange error codes that blacklist a symbol.
    #[serde(default = "default_critical_codes")]
    pub critical_codes: Vec<i64>,
}

fn default_critical_codes() -> Vec<i64> {
    DEFAULT_CRITICAL_CODES.to_vec()
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            critical_codes: default_critical_codes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Serve `/metrics` and `/health` on this port when set.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Environment variable holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Queued events before new ones are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            telegram: None,
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// Complete process configuration. Immutable once loaded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl AppConfig {
    /// Load `path` and apply process environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Load `path` with overrides from `env` instead of the process
    /// environment when given.
    pub fn load_with_env(
        path: impl AsRef<Path>,
        env: Option<HashMap<String, String>>,
    ) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let fail = |msg: &str| Err(AppError::Config(msg.to_string()));

        if self.trading.trade_notional_usd <= Decimal::ZERO {
            return fail("trading.trade_notional_usd must be positive");
        }
        if self.trading.leverage == 0 {
            return fail("trading.leverage must be at least 1");
        }
        if self.trading.commission_rate_pct < Decimal::ZERO {
            return fail("trading.commission_rate_pct must not be negative");
        }
        if self.concurrency.max_open_positions == 0 {
            return fail("concurrency.max_open_positions must be at least 1");
        }
        if self.concurrency.opener_workers == 0 {
            return fail("concurrency.opener_workers must be at least 1");
        }
        if self.concurrency.scan_top_k == 0 {
            return fail("concurrency.scan_top_k must be at least 1");
        }
        if self.intervals.scan_secs == 0
            || self.intervals.monitor_secs == 0
            || self.intervals.time_sync_secs == 0
        {
            return fail("intervals must be non-zero");
        }
        if self.rate_limit.requests_per_sec == 0 || self.rate_limit.weight_per_sec == 0 {
            return fail("rate_limit budgets must be non-zero");
        }
        if self.thresholds.exit.soft_close_min_count == 0 {
            return fail("thresholds.exit.soft_close_min_count must be at least 1");
        }
        if self.notifications.channel_capacity == 0 {
            return fail("notifications.channel_capacity must be at least 1");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Component settings
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            trade_notional_usd: self.trading.trade_notional_usd,
            leverage: self.trading.leverage,
            max_open_positions: self.concurrency.max_open_positions,
            entry: self.thresholds.entry,
            exit: self.thresholds.exit,
            commission_rate_pct: self.trading.commission_rate_pct,
            monitor_interval: Duration::from_secs(self.intervals.monitor_secs),
        }
    }

    #[must_use]
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            min_entry_spread_pct: self.thresholds.entry.min_spread_pct,
            min_funding_pct: self.thresholds.entry.min_funding_pct,
            top_k: self.concurrency.scan_top_k,
        }
    }

    #[must_use]
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::per_second(self.rate_limit.requests_per_sec, self.rate_limit.weight_per_sec)
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(self.exchange.request_timeout_ms),
            max_retries: self.exchange.max_retries,
            backoff_base: Duration::from_millis(self.exchange.backoff_base_ms),
            backoff_max: Duration::from_millis(self.exchange.backoff_max_ms),
        }
    }

    #[must_use]
    pub fn fill_polling(&self) -> FillPolling {
        FillPolling {
            attempts: self.exchange.fill_poll_attempts,
            interval: Duration::from_millis(self.exchange.fill_poll_interval_ms),
        }
    }

    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.scan_secs)
    }

    #[must_use]
    pub fn time_sync_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.time_sync_secs)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.intervals.shutdown_grace_secs)
    }
}
