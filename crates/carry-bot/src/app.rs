//! Main application orchestration.
//!
//! Coordinates all components:
//! - Server-time sync at startup and on a fixed interval
//! - Recovery of stored open positions before the first scan
//! - Periodic opportunity scan feeding a bounded pool of openers
//! - Per-position monitors owned by the supervisor, restarted on each scan
//!   tick if one has stopped
//! - Notification dispatch and the optional metrics server
//! - Graceful shutdown on Ctrl-C

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use carry_exchange::{
    ApiCredentials, BybitVenue, DynTransport, DynVenue, ExchangeClient, RateLimiter,
    ReqwestTransport, RequestSigner, ServerClock,
};
use carry_persistence::JsonStore;
use carry_position::{
    BlacklistCache, DynBlacklistStore, DynNotificationSink, DynPositionStore, EngineContext,
    LifecycleError, LifecycleManager, MonitorSupervisor,
};
use carry_scanner::{Candidate, OpportunityScanner};
use carry_telemetry::run_metrics_server;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::notifier::{
    notification_channel, DynNotifyBackend, LogBackend, NotificationDispatcher, TelegramBackend,
};

/// Time allowed for queued notifications to drain after shutdown.
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    client: Arc<ExchangeClient>,
    venue: DynVenue,
    manager: Arc<LifecycleManager>,
    supervisor: Arc<MonitorSupervisor>,
    scanner: OpportunityScanner,
    openers: Arc<Semaphore>,
    dispatcher: Option<NotificationDispatcher>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the production application: reqwest transport, credentials
    /// from the configured source, log and optional Telegram notifications.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = ApiCredentials::load(&config.exchange.credentials)?;
        let signer = RequestSigner::new(credentials, config.exchange.recv_window_ms);
        let timeout = Duration::from_millis(config.exchange.request_timeout_ms);
        let transport = ReqwestTransport::new(&config.exchange.base_url, timeout)
            .map_err(|e| AppError::Config(e.to_string()))?;

        let mut backends: Vec<DynNotifyBackend> = vec![Arc::new(LogBackend)];
        if let Some(telegram) = &config.notifications.telegram {
            backends.push(Arc::new(TelegramBackend::from_config(telegram, timeout)?));
            info!(chat_id = %telegram.chat_id, "Telegram notifications enabled");
        }

        Self::with_transport(config, Arc::new(transport), Some(signer), backends)
    }

    /// Build over an arbitrary transport.
    pub fn with_transport(
        config: AppConfig,
        transport: DynTransport,
        signer: Option<RequestSigner>,
        backends: Vec<DynNotifyBackend>,
    ) -> AppResult<Self> {
        config.validate()?;

        let client = Arc::new(ExchangeClient::new(
            transport,
            Arc::new(RateLimiter::new(config.rate_limiter_config())),
            Arc::new(ServerClock::default()),
            signer,
            config.client_config(),
        ));
        let venue: DynVenue = Arc::new(BybitVenue::new(
            Arc::clone(&client),
            Duration::from_secs(config.exchange.instrument_ttl_secs),
            config.fill_polling(),
        ));

        let store = Arc::new(JsonStore::open(&config.persistence.data_dir)?);
        let positions: DynPositionStore = Arc::clone(&store) as _;
        let blacklist_store: DynBlacklistStore = store;

        let (notifier, dispatcher) =
            notification_channel(config.notifications.channel_capacity, backends);
        let notifier: DynNotificationSink = Arc::new(notifier);

        let blacklist = Arc::new(BlacklistCache::load(
            blacklist_store,
            config.blacklist.critical_codes.iter().copied(),
            Arc::clone(&notifier),
        )?);

        let ctx = EngineContext::new(
            Arc::clone(&venue),
            positions,
            blacklist,
            notifier,
            config.lifecycle_config(),
        );
        let manager = Arc::new(LifecycleManager::new(ctx));
        let shutdown = CancellationToken::new();
        let supervisor = Arc::new(MonitorSupervisor::new(
            Arc::clone(&manager),
            shutdown.child_token(),
        ));
        let scanner = OpportunityScanner::new(config.scanner_config())?;
        let openers = Arc::new(Semaphore::new(config.concurrency.opener_workers));

        Ok(Self {
            config,
            client,
            venue,
            manager,
            supervisor,
            scanner,
            openers,
            dispatcher: Some(dispatcher),
            shutdown,
        })
    }

    /// Token that stops [`Application::run`] when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<MonitorSupervisor> {
        &self.supervisor
    }

    /// Run until Ctrl-C or the shutdown token is cancelled.
    pub async fn run(mut self) -> AppResult<()> {
        info!(
            base_url = %self.config.exchange.base_url,
            max_open_positions = self.config.concurrency.max_open_positions,
            opener_workers = self.config.concurrency.opener_workers,
            "Starting application"
        );

        self.sync_time().await;

        let dispatcher = self.dispatcher.take().map(|d| tokio::spawn(d.run()));
        let metrics = self.config.telemetry.metrics_port.map(|port| {
            let token = self.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = run_metrics_server(port, token).await {
                    error!(error = %e, "Metrics server failed");
                }
            })
        });

        let recovered = self.supervisor.recover_on_boot()?;
        info!(recovered, "Recovery complete");

        let mut scan_interval = tokio::time::interval(self.config.scan_interval());
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let sync_period = self.config.time_sync_interval();
        let mut sync_interval = tokio::time::interval_at(Instant::now() + sync_period, sync_period);
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut openers = JoinSet::new();

        info!("Entering main loop");
        loop {
            tokio::select! {
                _ = scan_interval.tick() => {
                    self.reconcile_monitors();
                    if let Err(e) = self.scan_once(&mut openers).await {
                        warn!(error = %e, "Scan failed");
                    }
                }

                _ = sync_interval.tick() => {
                    self.sync_time().await;
                }

                Some(joined) = openers.join_next(), if !openers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Opening task panicked");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }

                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.stop(openers, dispatcher, metrics).await;
        Ok(())
    }

    /// Scan once and start opening attempts for the best candidates.
    ///
    /// Symbols that are blacklisted or already active are excluded; at most
    /// as many attempts are started as there are free position slots and
    /// idle opener workers. Returns the number started.
    pub async fn scan_once(&self, openers: &mut JoinSet<()>) -> AppResult<usize> {
        let slots = self.manager.available_slots();
        if slots == 0 {
            debug!("No free position slots, scan skipped");
            return Ok(0);
        }

        let blacklist = &self.manager.context().blacklist;
        let manager = &self.manager;
        let candidates = self
            .scanner
            .scan(self.venue.as_ref(), |symbol| {
                blacklist.is_blacklisted(symbol) || manager.state(symbol).is_some()
            })
            .await?;
        info!(candidates = candidates.len(), slots, "Scan complete");

        let mut started = 0;
        for candidate in candidates.into_iter().take(slots) {
            let Ok(permit) = Arc::clone(&self.openers).try_acquire_owned() else {
                debug!("All opener workers busy");
                break;
            };
            let supervisor = Arc::clone(&self.supervisor);
            openers.spawn(async move {
                let _permit = permit;
                open_candidate(&supervisor, candidate).await;
            });
            started += 1;
        }
        Ok(started)
    }

    fn reconcile_monitors(&self) {
        match self.supervisor.reconcile() {
            Ok(0) => {}
            Ok(restarted) => warn!(restarted, "Restarted stopped monitors"),
            Err(e) => warn!(error = %e, "Monitor reconciliation failed"),
        }
    }

    async fn sync_time(&self) {
        match self.client.sync_time().await {
            Ok(offset_ms) => info!(offset_ms, "Server time synchronized"),
            Err(e) => warn!(error = %e, "Server time sync failed"),
        }
    }

    async fn stop(
        self,
        mut openers: JoinSet<()>,
        dispatcher: Option<JoinHandle<usize>>,
        metrics: Option<JoinHandle<()>>,
    ) {
        self.shutdown.cancel();
        let deadline = Instant::now() + self.config.shutdown_grace();

        while !openers.is_empty() {
            match tokio::time::timeout_at(deadline, openers.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = openers.len(), "Opening attempts still running after grace period");
                    break;
                }
            }
        }

        let remaining = self
            .supervisor
            .shutdown(deadline.saturating_duration_since(Instant::now()))
            .await;
        if remaining > 0 {
            warn!(remaining, "Monitors did not stop within the grace period");
        }

        if let Some(handle) = metrics {
            if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Metrics server did not stop in time");
            }
        }

        self.client.limiter().close();
        let faulted = self.manager.faulted_symbols();
        if !faulted.is_empty() {
            error!(symbols = ?faulted, "Positions in critical fault need manual handling");
        }

        // Dropping the engine drops the last notifier handles.
        let Self {
            manager,
            supervisor,
            venue,
            ..
        } = self;
        drop(supervisor);
        drop(manager);
        drop(venue);

        if let Some(handle) = dispatcher {
            match tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(processed)) => debug!(processed, "Notifications drained"),
                Ok(Err(e)) => error!(error = %e, "Notification dispatcher panicked"),
                Err(_) => warn!("Notification dispatcher did not drain in time"),
            }
        }
        info!("Shutdown complete");
    }
}

async fn open_candidate(supervisor: &MonitorSupervisor, candidate: Candidate) {
    let symbol = candidate.symbol().clone();
    match supervisor.open_and_watch(&candidate.quote).await {
        Ok(position) => info!(
            symbol = %symbol,
            spot_qty = %position.spot_qty,
            futures_qty = %position.futures_qty,
            entry_spread_pct = %position.entry_spread_pct,
            "Position opened and monitored"
        ),
        Err(
            e @ (LifecycleError::CapacityReached { .. }
            | LifecycleError::AlreadyActive(_)
            | LifecycleError::Blacklisted(_)
            | LifecycleError::EntryInvalidated { .. }),
        ) => debug!(symbol = %symbol, reason = %e, "Candidate skipped"),
        Err(e) if e.is_terminal() => error!(symbol = %symbol, error = %e, "Open ended in critical fault"),
        Err(e) => warn!(symbol = %symbol, error = %e, "Open failed"),
    }
}
