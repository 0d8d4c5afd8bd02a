//! Supervised pool of per-position monitor tasks.
//!
//! [`MonitorSupervisor::reconcile`] is run periodically by the application so
//! a monitor that panicked or exited early is restarted while its position
//! is still stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use carry_core::{MarketQuote, Position, Symbol};

use crate::error::LifecycleResult;
use crate::lifecycle::{LifecycleManager, PositionState, TickOutcome};

/// Owns one monitor task per open position.
pub struct MonitorSupervisor {
    manager: Arc<LifecycleManager>,
    tasks: Mutex<HashMap<Symbol, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl MonitorSupervisor {
    pub fn new(manager: Arc<LifecycleManager>, shutdown: CancellationToken) -> Self {
        Self {
            manager,
            tasks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Start monitoring `symbol` unless a live task already exists.
    pub fn watch(&self, symbol: Symbol) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.get(&symbol).is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let handle = tokio::spawn(run_monitor(
            Arc::clone(&self.manager),
            symbol.clone(),
            self.shutdown.child_token(),
        ));
        tasks.insert(symbol, handle);
        true
    }

    /// Open `candidate` and start its monitor.
    pub async fn open_and_watch(&self, candidate: &MarketQuote) -> LifecycleResult<Position> {
        let position = self.manager.open(candidate).await?;
        self.watch(position.symbol.clone());
        Ok(position)
    }

    /// Resume monitoring for every stored open position.
    pub fn recover_on_boot(&self) -> LifecycleResult<usize> {
        let open = self.manager.context().positions.list_open()?;
        for position in &open {
            self.manager.restore(position);
            self.watch(position.symbol.clone());
            info!(
                symbol = %position.symbol,
                opened_at = %position.opened_at,
                mode = %position.exit_mode(),
                "Recovered open position"
            );
        }
        Ok(open.len())
    }

    /// Respawn monitors for stored open positions whose task has ended.
    ///
    /// Finished handles are pruned first. Symbols in `Closing` or
    /// `CriticalFault` are left alone. Returns the number of monitors started.
    pub fn reconcile(&self) -> LifecycleResult<usize> {
        if self.shutdown.is_cancelled() {
            return Ok(0);
        }
        self.prune_finished();

        let mut respawned = 0;
        for position in self.manager.context().positions.list_open()? {
            let symbol = position.symbol.clone();
            match self.manager.state(&symbol) {
                None => {
                    self.manager.restore(&position);
                }
                Some(PositionState::Open(_)) => {}
                Some(_) => continue,
            }
            if self.watch(symbol.clone()) {
                warn!(symbol = %symbol, "Monitor was not running, restarted");
                respawned += 1;
            }
        }
        Ok(respawned)
    }

    fn prune_finished(&self) {
        self.tasks.lock().retain(|symbol, handle| {
            if handle.is_finished() {
                debug!(symbol = %symbol, "Pruned finished monitor");
                false
            } else {
                true
            }
        });
    }

    #[must_use]
    pub fn is_watching(&self, symbol: &Symbol) -> bool {
        self.tasks
            .lock()
            .get(symbol)
            .is_some_and(|h| !h.is_finished())
    }

    /// Live monitor tasks. Finished tasks are pruned.
    pub fn live_count(&self) -> usize {
        self.prune_finished();
        self.tasks.lock().len()
    }

    /// Stop monitors between intervals and wait up to `grace`.
    ///
    /// A monitor in the middle of a close is left to finish. Returns the
    /// number of tasks still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shutdown.cancel();
        let handles: Vec<_> = self.tasks.lock().drain().collect();
        let deadline = Instant::now() + grace;
        let mut remaining = 0;

        for (symbol, mut handle) in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(symbol = %symbol, "Monitor still running after grace period");
                remaining += 1;
            }
        }
        info!(remaining, "Monitors stopped");
        remaining
    }
}

async fn run_monitor(manager: Arc<LifecycleManager>, symbol: Symbol, shutdown: CancellationToken) {
    let interval = manager.context().config.monitor_interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(symbol = %symbol, interval_secs = interval.as_secs(), "Monitor started");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!(symbol = %symbol, "Monitor stopped by shutdown");
                break;
            }
            _ = ticker.tick() => {}
        }

        match manager.monitor_tick(&symbol).await {
            Ok(TickOutcome::Hold) => {}
            Ok(TickOutcome::Closed(record)) => {
                info!(symbol = %symbol, net_pnl = %record.net_pnl, "Monitor finished");
                break;
            }
            Ok(TickOutcome::Gone) => {
                warn!(symbol = %symbol, "Position no longer stored, monitor exiting");
                break;
            }
            Err(e) if e.is_terminal() => {
                error!(symbol = %symbol, error = %e, "Monitor stopped");
                break;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Monitor interval failed");
            }
        }
    }
}
