//! End-to-end behavior of capture, storage and delivery against real files.

mod common;

use common::{CollectingAlerts, QueuedProvider, Stores, SwitchableSink, T0, fix};
use std::sync::Arc;
use tokio::sync::Notify;
use traceract::capture::TriggerOutcome;
use traceract::config::WatchdogConfig;
use traceract::dedup::DuplicateReason;
use traceract::store::HistoryStore;
use traceract::sync::{ConnectivityFlag, FlushStatus, SyncEngine};
use traceract::watchdog::StalenessWatchdog;

const HOUR_MS: u64 = 3_600_000;

fn sync_engine(stores: &Stores, sink: Arc<SwitchableSink>) -> SyncEngine {
    SyncEngine::new(
        Arc::clone(&stores.queue),
        Arc::clone(&stores.sync_state),
        sink,
        Arc::new(ConnectivityFlag::default()),
    )
}

#[tokio::test]
async fn three_spaced_captures_fill_history_newest_first_and_queue() {
    let stores = Stores::new(T0);
    let provider = Arc::new(QueuedProvider::new(vec![
        Ok(fix(12.9716, 77.5946)),
        Ok(fix(12.9816, 77.6046)),
        Ok(fix(12.9916, 77.6146)),
    ]));
    let (scheduler, _events) = stores.scheduler(provider);

    for step in 0..3 {
        let outcome = scheduler.trigger_at(T0 + step * 300_000).await;
        assert!(matches!(outcome, TriggerOutcome::Accepted(_)), "step {step}: {outcome:?}");
    }

    let history = stores.history.snapshot();
    let times: Vec<u64> = history.iter().map(|p| p.captured_at).collect();
    assert_eq!(times, vec![T0 + 600_000, T0 + 300_000, T0]);
    assert_eq!(history[0].latitude, 12.9916);

    let queued: Vec<u64> = stores.queue.snapshot().iter().map(|e| e.point.id).collect();
    assert_eq!(queued, vec![T0, T0 + 300_000, T0 + 600_000]);
}

#[tokio::test]
async fn offline_capture_is_delivered_once_network_returns() {
    let stores = Stores::new(T0);
    let (scheduler, _events) = stores.scheduler(Arc::new(QueuedProvider::default()));
    assert!(matches!(
        scheduler.trigger_at(T0).await,
        TriggerOutcome::Accepted(_)
    ));
    assert!(matches!(
        scheduler.trigger_at(T0 + 300_000).await,
        TriggerOutcome::Accepted(_)
    ));

    let sink = Arc::new(SwitchableSink::default());
    let sync = sync_engine(&stores, Arc::clone(&sink));

    sink.set_network_down(true);
    let report = sync.flush_at(T0 + 600_000).await;
    assert_eq!(report.failed, 2);
    assert_eq!(stores.queue.len(), 2);
    assert!(stores.queue.snapshot().iter().all(|e| e.attempts == 1));
    assert_eq!(stores.sync_state.snapshot().last_successful_upload_at, T0);

    sink.set_network_down(false);
    let report = sync.flush_at(T0 + 900_000).await;
    assert_eq!(report.status, FlushStatus::Completed);
    assert_eq!(sink.delivered(), vec![T0, T0 + 300_000]);
    assert!(stores.queue.is_empty());
    assert_eq!(
        stores.sync_state.snapshot().last_successful_upload_at,
        T0 + 900_000
    );
}

#[tokio::test]
async fn jittered_triggers_accept_only_one_capture() {
    let stores = Stores::new(T0);
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(QueuedProvider::gated(
        vec![Ok(fix(1.0, 1.0)), Ok(fix(2.0, 2.0))],
        Arc::clone(&gate),
    ));
    let (scheduler, _events) = stores.scheduler(provider.clone());

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger_at(T0).await })
    };
    while provider.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        scheduler.trigger_at(T0 + 2_000).await,
        TriggerOutcome::SkippedInFlight
    );
    gate.notify_one();
    assert!(matches!(first.await.unwrap(), TriggerOutcome::Accepted(_)));

    assert_eq!(
        scheduler.trigger_at(T0 + 2_000).await,
        TriggerOutcome::SkippedTooSoon {
            since_last_ms: 2_000
        }
    );
    assert_eq!(provider.calls(), 1);
    assert_eq!(stores.history.len(), 1);
    assert_eq!(stores.queue.len(), 1);
}

#[tokio::test]
async fn stationary_fix_inside_window_is_dropped() {
    let stores = Stores::new(T0);
    let provider = Arc::new(QueuedProvider::new(vec![
        Ok(fix(5.0, 5.0)),
        Ok(fix(5.000_001, 5.0)),
        Ok(fix(5.000_001, 5.0)),
    ]));
    let (scheduler, _events) = stores.scheduler(provider);

    let TriggerOutcome::Accepted(first) = scheduler.trigger_at(T0).await else {
        panic!("first capture should be accepted");
    };
    assert_eq!(
        scheduler.trigger_at(T0 + 30_000).await,
        TriggerOutcome::Duplicate(DuplicateReason::NearDuplicate {
            existing_id: first.id
        })
    );
    assert!(matches!(
        scheduler.trigger_at(T0 + 120_000).await,
        TriggerOutcome::Accepted(_)
    ));
    assert_eq!(stores.history.len(), 2);
}

#[tokio::test]
async fn stale_uploads_alert_every_tick_until_a_delivery() {
    let stores = Stores::new(T0);
    let alerts = Arc::new(CollectingAlerts::default());
    let watchdog = StalenessWatchdog::new(
        Arc::clone(&stores.sync_state),
        alerts.clone(),
        &WatchdogConfig {
            stale_threshold_hours: 7,
            check_interval_secs: 3600,
        },
    );

    let now = T0 + 8 * HOUR_MS;
    assert!(watchdog.check_at(now).await.is_some());
    assert!(watchdog.check_at(now + HOUR_MS).await.is_some());
    assert_eq!(alerts.alerts().len(), 2);
    assert_eq!(alerts.alerts()[0].hours_since_upload, 8);

    stores.sync_state.record_upload_success(now + HOUR_MS).unwrap();
    assert!(watchdog.check_at(now + 2 * HOUR_MS).await.is_none());
    assert_eq!(alerts.alerts().len(), 2);
}

#[tokio::test]
async fn every_accepted_point_is_queued_or_delivered() {
    let stores = Stores::new(T0);
    let (scheduler, _events) = stores.scheduler(Arc::new(QueuedProvider::default()));
    let sink = Arc::new(SwitchableSink::default());
    let sync = sync_engine(&stores, Arc::clone(&sink));

    let mut accepted = Vec::new();
    for step in 0..6u64 {
        if let TriggerOutcome::Accepted(p) = scheduler.trigger_at(T0 + step * 60_000).await {
            accepted.push(p.id);
        }
        sink.set_network_down(step % 2 == 0);
        sync.flush_at(T0 + step * 60_000 + 1).await;
    }

    let mut seen: Vec<u64> = sink.delivered();
    seen.extend(stores.queue.snapshot().iter().map(|e| e.point.id));
    seen.sort_unstable();
    assert_eq!(seen, accepted);
}

#[tokio::test]
async fn history_survives_reopen_and_load_is_idempotent() {
    let stores = Stores::new(T0);
    let (scheduler, _events) = stores.scheduler(Arc::new(QueuedProvider::default()));
    for step in 0..3 {
        scheduler.trigger_at(T0 + step * 300_000).await;
    }

    let reopened = HistoryStore::open(&stores.paths.history, &stores.paths.history_backup, 50);
    assert_eq!(reopened.snapshot(), stores.history.snapshot());
    assert_eq!(reopened.load(), reopened.load());
}
