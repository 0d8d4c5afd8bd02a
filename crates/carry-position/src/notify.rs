//! Lifecycle notification events.
//!
//! Sinks are fire-and-forget: `notify` must not block and cannot fail the
//! caller. Formatting for a particular channel happens in the sink.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use carry_core::{BlacklistEntry, ClosedPosition, Position, Size, Symbol};

/// Where a critical fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    /// Futures short filled, spot buy failed.
    OpenSpotLeg,
    /// Futures order sent but its fill could not be confirmed.
    OpenFuturesUnconfirmed,
    /// Spot sold, futures buy-back failed.
    CloseFuturesLeg,
    /// Spot sale sent but its fill could not be confirmed.
    CloseSpotUnconfirmed,
    /// Exchange state changed but the store write failed.
    StoreDivergence,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OpenSpotLeg => "open_spot_leg",
            Self::OpenFuturesUnconfirmed => "open_futures_unconfirmed",
            Self::CloseFuturesLeg => "close_futures_leg",
            Self::CloseSpotUnconfirmed => "close_spot_unconfirmed",
            Self::StoreDivergence => "store_divergence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    PositionOpened {
        position: Position,
    },
    PositionClosed {
        record: ClosedPosition,
    },
    CriticalFault {
        symbol: Symbol,
        stage: FaultStage,
        /// Futures short without a spot hedge. Requested size when the fill
        /// is unconfirmed, zero when both legs are still hedged.
        unhedged_futures_qty: Size,
        error: String,
    },
    BlacklistAdded {
        entry: BlacklistEntry,
    },
}

impl NotificationEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::CriticalFault { .. } => "critical_fault",
            Self::BlacklistAdded { .. } => "blacklist_added",
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::PositionOpened { position } => &position.symbol,
            Self::PositionClosed { record } => &record.symbol,
            Self::CriticalFault { symbol, .. } => symbol,
            Self::BlacklistAdded { entry } => &entry.symbol,
        }
    }
}

/// Fire-and-forget event consumer.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

pub type DynNotificationSink = Arc<dyn NotificationSink>;

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: NotificationEvent) {}
}
