//! Monitor task pool: boot recovery, interval scheduling and shutdown.

mod common;

use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use carry_core::{ExitMode, MonitorCounters, Position, Price, Size};
use carry_position::{MonitorSupervisor, PositionState, PositionStore};

use common::{config, entry_quote, harness, quote, symbol, Fail, ScriptedVenue};

fn stored_position() -> Position {
    Position {
        symbol: symbol(),
        spot_entry_price: Price::new(dec!(100)),
        futures_entry_price: Price::new(dec!(100.5)),
        spot_qty: Size::new(dec!(0.298)),
        futures_qty: Size::new(dec!(0.298)),
        entry_spread_pct: dec!(0.5),
        entry_funding_rate_pct: dec!(0.03),
        leverage: 1,
        opened_at: Utc::now(),
        counters: MonitorCounters::default(),
    }
}

const INTERVAL: Duration = Duration::from_secs(300);

#[tokio::test(start_paused = true)]
async fn test_recovered_position_is_monitored_to_soft_close() {
    let hold = quote(dec!(100.2), dec!(100.3), dec!(0.004));
    let venue = ScriptedVenue::new(hold.clone());
    for _ in 0..14 {
        venue.push_quote(hold.clone());
    }
    venue.push_quote(quote(dec!(100.0), dec!(100.1), dec!(0.006)));
    let h = harness(venue, config());
    h.store.create(&stored_position()).unwrap();

    let supervisor = MonitorSupervisor::new(h.manager.clone(), CancellationToken::new());
    assert_eq!(supervisor.recover_on_boot().unwrap(), 1);
    assert!(supervisor.is_watching(&symbol()));

    // First interval fires immediately, then every 300s.
    tokio::time::sleep(INTERVAL * 14 + Duration::from_secs(1)).await;
    assert_eq!(
        h.manager.state(&symbol()),
        Some(PositionState::Open(ExitMode::SoftClose))
    );
    assert!(h.store.list_recent_closed(1).unwrap().is_empty());

    tokio::time::sleep(INTERVAL).await;
    let closed = h.store.list_recent_closed(1).unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_mode, ExitMode::SoftClose);
    assert_eq!(supervisor.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_is_idempotent_per_symbol() {
    let h = harness(ScriptedVenue::new(entry_quote()), config());
    let supervisor = MonitorSupervisor::new(h.manager.clone(), CancellationToken::new());

    let position = supervisor.open_and_watch(&entry_quote()).await.unwrap();

    assert!(!supervisor.watch(position.symbol.clone()));
    assert_eq!(supervisor.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_monitors_between_intervals() {
    let h = harness(
        ScriptedVenue::new(quote(dec!(100.2), dec!(100.3), dec!(0.03))),
        config(),
    );
    h.store.create(&stored_position()).unwrap();
    let supervisor = MonitorSupervisor::new(h.manager.clone(), CancellationToken::new());
    supervisor.recover_on_boot().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let remaining = supervisor.shutdown(Duration::from_secs(5)).await;

    assert_eq!(remaining, 0);
    assert!(!supervisor.is_watching(&symbol()));
    // Position untouched, ready for recovery on next boot.
    assert!(h.store.get_by_open_symbol(&symbol()).unwrap().is_some());
    assert_eq!(h.venue.count("spot_close"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_restarts_stopped_monitor() {
    let h = harness(
        ScriptedVenue::new(quote(dec!(100.2), dec!(100.3), dec!(0.03))),
        config(),
    );
    h.store.create(&stored_position()).unwrap();
    let supervisor = MonitorSupervisor::new(h.manager.clone(), CancellationToken::new());
    supervisor.recover_on_boot().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Record vanishes for one interval: the monitor sees nothing stored and exits.
    h.store.delete(&symbol()).unwrap();
    tokio::time::sleep(INTERVAL).await;
    assert!(!supervisor.is_watching(&symbol()));
    assert_eq!(h.manager.state(&symbol()), None);

    h.store.create(&stored_position()).unwrap();
    assert_eq!(supervisor.reconcile().unwrap(), 1);
    assert!(supervisor.is_watching(&symbol()));
    assert_eq!(
        h.manager.state(&symbol()),
        Some(PositionState::Open(ExitMode::Normal))
    );

    assert_eq!(supervisor.reconcile().unwrap(), 0);
    assert_eq!(supervisor.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_skips_faulted_symbols() {
    let venue = ScriptedVenue::new(quote(dec!(100.0), dec!(100.1), dec!(-0.01)));
    venue.fail_futures_close(Fail::Rejected(110017));
    let h = harness(venue, config());
    h.store.create(&stored_position()).unwrap();
    let supervisor = MonitorSupervisor::new(h.manager.clone(), CancellationToken::new());
    supervisor.recover_on_boot().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.manager.state(&symbol()), Some(PositionState::CriticalFault));
    assert!(h.store.get_by_open_symbol(&symbol()).unwrap().is_some());
    assert_eq!(supervisor.reconcile().unwrap(), 0);
    assert!(!supervisor.is_watching(&symbol()));
}
