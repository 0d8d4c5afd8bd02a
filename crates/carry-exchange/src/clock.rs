//! Request timestamps corrected for server clock skew.
//!
//! Signed requests are rejected when the timestamp falls outside the
//! receive window, so every request is stamped with
//! `local_time + server_offset`.
//!
//! # Offset Convention
//! `server_offset_ms = server_time - local_time`
//! - Positive: server clock is ahead of local
//! - Negative: server clock is behind local

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{info, warn};

/// Trait for obtaining current time, enabling testability.
pub trait Clock: Send + Sync {
    /// Returns current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Local clock plus a measured server offset.
pub struct ServerClock<C: Clock = SystemClock> {
    server_offset_ms: AtomicI64,
    /// Local time of the last successful sync (0 = never).
    last_sync_ms: AtomicU64,
    clock: C,
}

impl<C: Clock> ServerClock<C> {
    /// Offsets beyond this are logged; the offset is still applied.
    const DRIFT_WARN_THRESHOLD_MS: i64 = 1000;

    #[must_use]
    pub fn new(clock: C) -> Self {
        Self {
            server_offset_ms: AtomicI64::new(0),
            last_sync_ms: AtomicU64::new(0),
            clock,
        }
    }

    /// Approximate server time in milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let local = self.clock.now_ms();
        let offset = self.server_offset_ms.load(Ordering::Acquire);
        if offset >= 0 {
            local.saturating_add(offset as u64)
        } else {
            local.saturating_sub(offset.unsigned_abs())
        }
    }

    /// Record a server time observation and update the offset.
    pub fn sync_with_server(&self, server_time_ms: u64) -> i64 {
        let local_time = self.clock.now_ms();
        let offset = if server_time_ms >= local_time {
            (server_time_ms - local_time) as i64
        } else {
            -((local_time - server_time_ms) as i64)
        };

        if offset.abs() > Self::DRIFT_WARN_THRESHOLD_MS {
            warn!(offset_ms = offset, "Significant clock drift against server");
        } else {
            info!(offset_ms = offset, "Server time synchronized");
        }

        self.server_offset_ms.store(offset, Ordering::Release);
        self.last_sync_ms.store(local_time, Ordering::Release);
        offset
    }

    #[must_use]
    pub fn server_offset_ms(&self) -> i64 {
        self.server_offset_ms.load(Ordering::Acquire)
    }

    /// True if never synced or the last sync is older than `max_age_ms`.
    #[must_use]
    pub fn is_stale(&self, max_age_ms: u64) -> bool {
        let last = self.last_sync_ms.load(Ordering::Acquire);
        last == 0 || self.clock.now_ms().saturating_sub(last) > max_age_ms
    }
}

impl Default for ServerClock<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}
