//! Per-interval exit evaluation for an open position.
//!
//! Normal mode closes when funding turns negative enough and the exit spread
//! is tight. A sustained run of low funding arms soft-close mode, which closes
//! on a looser funding condition under the same spread cap.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use carry_core::{ExitMode, MonitorCounters};

// ============================================================================
// ExitThresholds
// ============================================================================

/// Exit thresholds, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitThresholds {
    /// Normal mode closes when funding is strictly below this.
    #[serde(default = "default_normal_close_funding_pct")]
    pub normal_close_funding_pct: Decimal,
    /// Both modes require the exit spread at or below this.
    #[serde(default = "default_max_close_spread_pct")]
    pub max_close_spread_pct: Decimal,
    /// Funding at or below this extends the low-funding streak.
    #[serde(default = "default_soft_tracking_funding_pct")]
    pub soft_tracking_funding_pct: Decimal,
    /// Soft-close mode closes when funding is at or below this.
    #[serde(default = "default_soft_close_funding_pct")]
    pub soft_close_funding_pct: Decimal,
    /// Streak length that arms soft-close mode.
    #[serde(default = "default_soft_close_min_count")]
    pub soft_close_min_count: u32,
}

fn default_normal_close_funding_pct() -> Decimal {
    Decimal::new(-1, 3)
}

fn default_max_close_spread_pct() -> Decimal {
    Decimal::new(5, 1)
}

fn default_soft_tracking_funding_pct() -> Decimal {
    Decimal::new(1, 2)
}

fn default_soft_close_funding_pct() -> Decimal {
    Decimal::new(1, 2)
}

fn default_soft_close_min_count() -> u32 {
    10
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            normal_close_funding_pct: default_normal_close_funding_pct(),
            max_close_spread_pct: default_max_close_spread_pct(),
            soft_tracking_funding_pct: default_soft_tracking_funding_pct(),
            soft_close_funding_pct: default_soft_close_funding_pct(),
            soft_close_min_count: default_soft_close_min_count(),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Market state observed at one monitor interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitObservation {
    pub funding_rate_pct: Decimal,
    pub exit_spread_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Close(ExitMode),
}

/// Update `counters` with one observation, then decide.
///
/// Counters are advanced before the rule is picked, so the interval that
/// arms soft-close mode is already evaluated under it. Funding above the
/// tracking threshold resets the streak and disarms soft-close mode.
pub fn evaluate_exit(
    counters: &mut MonitorCounters,
    observation: ExitObservation,
    thresholds: &ExitThresholds,
) -> ExitDecision {
    counters.funding_observations = counters.funding_observations.saturating_add(1);

    if observation.funding_rate_pct <= thresholds.soft_tracking_funding_pct {
        counters.low_funding_streak = counters.low_funding_streak.saturating_add(1);
        if counters.low_funding_streak >= thresholds.soft_close_min_count {
            counters.soft_close_armed = true;
        }
    } else {
        counters.low_funding_streak = 0;
        counters.soft_close_armed = false;
    }

    let spread_ok = observation.exit_spread_pct <= thresholds.max_close_spread_pct;
    let (mode, funding_ok) = if counters.soft_close_armed {
        (
            ExitMode::SoftClose,
            observation.funding_rate_pct <= thresholds.soft_close_funding_pct,
        )
    } else {
        (
            ExitMode::Normal,
            observation.funding_rate_pct < thresholds.normal_close_funding_pct,
        )
    };

    debug!(
        mode = %mode,
        funding = %observation.funding_rate_pct,
        exit_spread = %observation.exit_spread_pct,
        streak = counters.low_funding_streak,
        funding_ok,
        spread_ok,
        "Exit evaluation"
    );

    if funding_ok && spread_ok {
        ExitDecision::Close(mode)
    } else {
        ExitDecision::Hold
    }
}
