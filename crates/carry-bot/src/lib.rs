//! Spot/futures cash-and-carry bot.
//!
//! Main application that orchestrates all components:
//! - Layered configuration (TOML file plus `CARRY__` environment overrides)
//! - Rate-limited, signed exchange access
//! - Opportunity scanning and bounded concurrent opening
//! - Per-position monitoring, exit and close
//! - File-backed positions, history and blacklist
//! - Log and Telegram notifications

pub mod app;
pub mod config;
pub mod error;
pub mod notifier;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use notifier::{
    format_event, notification_channel, ChannelNotifier, DynNotifyBackend, LogBackend,
    NotificationDispatcher, NotifyBackend, TelegramBackend,
};
