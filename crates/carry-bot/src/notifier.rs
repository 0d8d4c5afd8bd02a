//! Notification dispatch.
//!
//! The lifecycle emits events through [`ChannelNotifier`], which never
//! blocks: events go onto a bounded channel and are dropped with a warning
//! when it is full. [`NotificationDispatcher`] drains the channel, formats
//! each event once and hands the text to every backend.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use carry_exchange::BoxFuture;
use carry_position::{NotificationEvent, NotificationSink};

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};

// ============================================================================
// Backends
// ============================================================================

/// Delivers formatted notification text somewhere.
pub trait NotifyBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<()>>;
}

pub type DynNotifyBackend = Arc<dyn NotifyBackend>;

/// Writes notifications to the log.
pub struct LogBackend;

impl NotifyBackend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            info!(target: "carry::notify", "{text}");
            Ok(())
        })
    }
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramBackend {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramBackend {
    /// Build from config, reading the bot token from the named variable.
    pub fn from_config(config: &TelegramConfig, timeout: Duration) -> AppResult<Self> {
        let token = std::env::var(&config.bot_token_env).map_err(|_| {
            AppError::Config(format!("{} not set", config.bot_token_env))
        })?;
        Self::new(&config.api_url, token.trim(), &config.chat_id, timeout)
    }

    pub fn new(api_url: &str, token: &str, chat_id: &str, timeout: Duration) -> AppResult<Self> {
        if token.is_empty() || chat_id.is_empty() {
            return Err(AppError::Config("empty Telegram token or chat id".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", api_url.trim_end_matches('/')),
            chat_id: chat_id.to_string(),
        })
    }
}

impl NotifyBackend for TelegramBackend {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn deliver<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            });
            // Errors are stripped of the URL, which carries the token.
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::Notify(e.without_url().to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Notify(format!("Telegram returned HTTP {status}")));
            }
            Ok(())
        })
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Create the sink handed to the engine and the dispatcher that drains it.
pub fn notification_channel(
    capacity: usize,
    backends: Vec<DynNotifyBackend>,
) -> (ChannelNotifier, NotificationDispatcher) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ChannelNotifier { tx },
        NotificationDispatcher { rx, backends },
    )
}

/// Non-blocking [`NotificationSink`] over a bounded channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    kind = event.kind(),
                    symbol = %event.symbol(),
                    "Notification queue full, event dropped"
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!(kind = event.kind(), "Notification dispatcher gone, event dropped");
            }
        }
    }
}

pub struct NotificationDispatcher {
    rx: mpsc::Receiver<NotificationEvent>,
    backends: Vec<DynNotifyBackend>,
}

impl NotificationDispatcher {
    /// Deliver events until every [`ChannelNotifier`] is dropped.
    ///
    /// Returns the number of events processed.
    pub async fn run(mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.rx.recv().await {
            let text = format_event(&event);
            for backend in &self.backends {
                if let Err(e) = backend.deliver(&text).await {
                    warn!(
                        backend = backend.name(),
                        kind = event.kind(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
            processed += 1;
        }
        debug!(processed, "Notification dispatcher stopped");
        processed
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Human-readable text for one event.
#[must_use]
pub fn format_event(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::PositionOpened { position } => format!(
            "Position opened: {}\n\
             Spot: {} @ {}\n\
             Futures: {} @ {}\n\
             Entry spread: {}%\n\
             Funding rate: {}%",
            position.symbol,
            position.spot_qty,
            position.spot_entry_price,
            position.futures_qty,
            position.futures_entry_price,
            position.entry_spread_pct.round_dp(4),
            position.entry_funding_rate_pct.round_dp(4),
        ),
        NotificationEvent::PositionClosed { record } => {
            let mut text = format!(
                "Position closed: {} ({})\n\
                 Net PnL: {} USDT\n\
                 Spot: {} | Futures: {} | Funding: {} | Commission: {}\n\
                 Spread: {}% -> {}% ({})\n\
                 Held: {}h, {} funding checks",
                record.symbol,
                record.exit_mode,
                usd(record.net_pnl),
                usd(record.spot_pnl),
                usd(record.futures_pnl),
                usd(record.funding_pnl),
                usd(record.commission),
                record.entry_spread_pct.round_dp(4),
                record.exit_spread_pct.round_dp(4),
                record.spread_direction,
                record.holding_hours(),
                record.funding_observations,
            );
            if !record.funding_reconciled {
                text.push_str("\nFunding not reconciled, PnL excludes funding");
            }
            text
        }
        NotificationEvent::CriticalFault {
            symbol,
            stage,
            unhedged_futures_qty,
            error,
        } => format!(
            "CRITICAL: {symbol}\n\
             Stage: {stage}\n\
             Unhedged futures qty: {unhedged_futures_qty}\n\
             Error: {error}\n\
             Manual intervention required"
        ),
        NotificationEvent::BlacklistAdded { entry } => {
            let code = entry
                .error_code
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            format!(
                "Blacklisted: {}\nReason: {}\nCode: {code}",
                entry.symbol, entry.reason
            )
        }
    }
}

fn usd(value: Decimal) -> Decimal {
    value.round_dp(4)
}
