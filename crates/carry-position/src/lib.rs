//! Position lifecycle for the carry bot.
//!
//! Opens hedged spot/futures pairs, monitors them on a fixed interval and
//! closes them when funding and spread conditions are met.
//!
//! # Key Components
//!
//! - [`LifecycleManager`]: open / monitor / close state machine per symbol
//! - [`MonitorSupervisor`]: one monitor task per open position, boot recovery
//! - [`EngineContext`]: venue, stores, blacklist, notifier and settings
//! - [`PnlEngine`]: pure realized PnL
//! - [`evaluate_exit`]: normal and soft-close exit rules
//! - [`BlacklistCache`]: write-through blacklist with critical-code policy
//! - [`PositionStore`], [`BlacklistStore`]: storage interfaces, [`MemoryStore`]
//! - [`NotificationSink`]: fire-and-forget lifecycle events

pub mod blacklist;
pub mod context;
pub mod error;
pub mod exit;
pub mod lifecycle;
pub mod notify;
pub mod pnl;
pub mod store;
pub mod supervisor;

pub use blacklist::{BlacklistCache, DEFAULT_CRITICAL_CODES};
pub use context::{EngineContext, LifecycleConfig};
pub use error::{LifecycleError, LifecycleResult, StoreError, StoreResult};
pub use exit::{evaluate_exit, ExitDecision, ExitObservation, ExitThresholds};
pub use lifecycle::{LifecycleManager, PositionState, TickOutcome};
pub use notify::{DynNotificationSink, FaultStage, NotificationEvent, NotificationSink, NullSink};
pub use pnl::{PnlBreakdown, PnlEngine, PnlInputs};
pub use store::{BlacklistStore, DynBlacklistStore, DynPositionStore, MemoryStore, PositionStore};
pub use supervisor::MonitorSupervisor;
