use std::sync::Arc;
use std::time::Duration;

use millboard_pipeline::cache::{MemoryStore, CACHE_TIMESTAMP_KEY, PERSISTED_KEYS};
use millboard_pipeline::clock::ManualClock;
use millboard_pipeline::config::SyncConfig;
use millboard_pipeline::controller::{Controller, Phase, ProcessingOutcome, RefreshMode, RefreshReport};
use millboard_pipeline::error::RefreshError;
use millboard_pipeline::fake_api::FakeDashboardApi;
use millboard_pipeline::lead_time_browser::LeadTimeBrowser;
use millboard_pipeline::aggregator::RefreshStatus;
use millboard_pipeline::types::Endpoint;
use millboard_pipeline::KeyValueStore;
use serde_json::json;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    fake: FakeDashboardApi,
    memory: MemoryStore,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        let fake = FakeDashboardApi::new();
        seed(&fake);
        Self {
            fake,
            memory: MemoryStore::new(),
            clock: ManualClock::at(0),
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            settle_delay: Duration::ZERO,
            refresh_period: Duration::from_millis(100),
            ..SyncConfig::default()
        }
    }

    /// A controller over the shared store, as after a process restart.
    fn controller(&self) -> Controller {
        Controller::new(
            Self::config(),
            Arc::new(self.fake.clone()),
            Arc::new(self.memory.clone()),
            Arc::new(self.clock.clone()),
        )
    }

    async fn ready_controller(&self) -> Controller {
        let ctl = self.controller();
        assert_eq!(ctl.start().await, Phase::AwaitingUpload);
        ctl.begin_processing().unwrap();
        let phase = ctl
            .on_external_processing_complete(ProcessingOutcome::Succeeded)
            .await
            .unwrap();
        assert_eq!(phase, Phase::Ready);
        ctl
    }
}

fn seed(fake: &FakeDashboardApi) {
    fake.respond(
        Endpoint::Summary,
        json!({ "summary": {
            "jobs": {
                "all_jobs": [
                    { "ITEM_CODE": "GR-100", "STAGE": "RFM", "PROCESS": "Turning", "QUANTITY": 40, "URGENCY": "CRITICAL" },
                    { "ITEM_CODE": "GR-200", "STAGE": "WIP_RAW", "PROCESS": "Casting", "QUANTITY": 15, "URGENCY": "LOW" }
                ]
            },
            "machines": { "overloaded": 2, "high_load": 1, "medium_load": 4, "available": 9 }
        }}),
    )
    .respond(
        Endpoint::LeadTimes,
        json!({ "data": [
            { "ITEM_CODE": "GR-100", "LEAD_TIME_SERIAL": 10, "LEAD_TIME_PARALLELIZED": 7 },
            { "ITEM_CODE": "GR-200", "LEAD_TIME_SERIAL": 0, "LEAD_TIME_PARALLELIZED": 0 }
        ], "total": 2 }),
    )
    .respond(
        Endpoint::StockStatus,
        json!({ "data": [
            { "ITEM_CODE": "GR-100", "STOCK_ADEQUACY": "Out of Stock" },
            { "ITEM_CODE": "GR-200", "STOCK_ADEQUACY": "Adequate" }
        ]}),
    )
    .respond(
        Endpoint::ParallelizationPairs,
        json!({ "data": [
            { "ITEM_1": "GR-100", "ITEM_2": "GR-200", "SEQUENTIAL_TIME_DAYS": 12, "PARALLEL_TIME_DAYS": 8, "CAN_RUN_PARALLEL": true }
        ]}),
    );
}

// ---------------------------------------------------------------------------
// TTL policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_within_ttl_is_noop_and_after_ttl_refetches_once() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    assert_eq!(ctl.refresh_attempts(), 1);
    let summary_calls = h.fake.calls(Endpoint::Summary);

    h.clock.set_ms(200_000);
    assert_eq!(ctl.refresh(RefreshMode::IfStale).await.unwrap(), RefreshReport::CacheHit);
    assert_eq!(ctl.refresh_attempts(), 1);
    assert_eq!(h.fake.calls(Endpoint::Summary), summary_calls);

    h.clock.set_ms(400_000);
    let report = ctl.refresh(RefreshMode::IfStale).await.unwrap();
    assert_eq!(report, RefreshReport::Refreshed { status: RefreshStatus::Full });
    assert_eq!(ctl.refresh_attempts(), 2);
    assert_eq!(h.fake.calls(Endpoint::Summary), summary_calls + 1);
    assert_eq!(
        ctl.snapshot().unwrap().captured_at.timestamp_millis(),
        400_000
    );
}

#[tokio::test]
async fn forced_refresh_ignores_ttl() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    h.clock.set_ms(1_000);
    ctl.refresh(RefreshMode::Force).await.unwrap();
    assert_eq!(ctl.refresh_attempts(), 2);
}

// ---------------------------------------------------------------------------
// Cold start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_start_with_fresh_cache_makes_no_network_call() {
    let h = Harness::new();
    h.ready_controller().await;
    let calls = h.fake.total_calls();

    h.clock.set_ms(60_000);
    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::Ready);
    assert_eq!(h.fake.total_calls(), calls);
    assert_eq!(restarted.refresh_attempts(), 0);
    let snapshot = restarted.snapshot().unwrap();
    assert_eq!(snapshot.jobs.len(), 2);
    assert!(!restarted.status().stale);
}

#[tokio::test]
async fn cold_start_with_stale_cache_refreshes() {
    let h = Harness::new();
    h.ready_controller().await;

    h.clock.set_ms(900_000);
    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::Ready);
    assert_eq!(restarted.refresh_attempts(), 1);
    assert_eq!(
        restarted.snapshot().unwrap().captured_at.timestamp_millis(),
        900_000
    );
}

#[tokio::test]
async fn cold_start_unreachable_serves_stale_snapshot_with_flag() {
    let h = Harness::new();
    h.ready_controller().await;

    h.clock.set_ms(900_000);
    h.fake.set_healthy(false);
    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::Ready);
    let status = restarted.status();
    assert!(status.stale);
    assert!(status.last_error.is_some());
    assert_eq!(restarted.snapshot().unwrap().captured_at.timestamp_millis(), 0);
}

#[tokio::test]
async fn cold_start_unreachable_without_cache_clears_and_awaits_upload() {
    let h = Harness::new();
    h.ready_controller().await;
    // Keep the pipeline flag, lose the snapshot.
    for key in ["cached_dashboard_data", CACHE_TIMESTAMP_KEY] {
        h.memory.remove(key).unwrap();
    }

    h.fake.set_healthy(false);
    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::AwaitingUpload);
    assert!(h.memory.is_empty());
    assert!(restarted.snapshot().is_none());
}

#[tokio::test]
async fn corrupt_cache_does_not_break_startup() {
    let h = Harness::new();
    h.ready_controller().await;
    h.memory.write("cached_dashboard_data", "{{{").unwrap();

    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::Ready);
    assert_eq!(restarted.refresh_attempts(), 1);
}

// ---------------------------------------------------------------------------
// Processing and reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_clears_all_four_keys_and_next_start_awaits_upload() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    for key in PERSISTED_KEYS {
        assert!(h.memory.contains(key), "{key} persisted");
    }

    ctl.reset().unwrap();
    assert_eq!(ctl.phase(), Phase::AwaitingUpload);
    assert!(ctl.snapshot().is_none());
    for key in PERSISTED_KEYS {
        assert!(!h.memory.contains(key), "{key} cleared");
    }

    let calls = h.fake.total_calls();
    let restarted = h.controller();
    assert_eq!(restarted.start().await, Phase::AwaitingUpload);
    assert_eq!(h.fake.total_calls(), calls);
}

#[tokio::test]
async fn failed_initial_refresh_enters_connection_error_then_retry_recovers() {
    let h = Harness::new();
    let ctl = h.controller();
    ctl.start().await;
    ctl.begin_processing().unwrap();

    h.fake.set_healthy(false);
    let phase = ctl
        .on_external_processing_complete(ProcessingOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(phase, Phase::ConnectionError);
    assert!(ctl.snapshot().is_none());
    assert!(ctl.status().pipeline.etl_completed);

    let err = ctl.retry().await.unwrap_err();
    assert!(matches!(err, RefreshError::Unreachable(_)));
    assert_eq!(ctl.phase(), Phase::ConnectionError);

    h.fake.set_healthy(true);
    assert_eq!(ctl.retry().await.unwrap(), Phase::Ready);
    assert!(ctl.snapshot().is_some());
}

#[tokio::test]
async fn failed_refresh_while_ready_keeps_data_and_marks_stale() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;

    h.fake.set_healthy(false);
    let err = ctl.refresh(RefreshMode::Force).await.unwrap_err();
    assert!(err.is_total_failure());
    assert_eq!(ctl.phase(), Phase::Ready);
    assert!(ctl.status().stale);
    assert_eq!(ctl.snapshot().unwrap().jobs.len(), 2);
    assert!(h.memory.contains("cached_dashboard_data"));

    h.fake.set_healthy(true);
    ctl.refresh(RefreshMode::Force).await.unwrap();
    assert!(!ctl.status().stale);
}

#[tokio::test]
async fn one_endpoint_down_yields_partial_snapshot() {
    let h = Harness::new();
    h.fake.fail(Endpoint::StockStatus, 502);
    let ctl = h.ready_controller().await;

    let status = ctl.status();
    assert_eq!(status.degraded, vec![Endpoint::StockStatus]);
    let snapshot = ctl.snapshot().unwrap();
    assert!(snapshot.stock.is_empty());
    assert_eq!(snapshot.jobs.len(), 2);
    assert_eq!(snapshot.lead_times.len(), 2);
    assert_eq!(snapshot.pairs.len(), 1);
    assert_eq!(snapshot.summary.machines.available, 9);
}

// ---------------------------------------------------------------------------
// Ordering and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn slow_older_cycle_cannot_overwrite_newer_snapshot() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;

    h.clock.set_ms(1_000);
    h.fake.delay(Endpoint::Summary, Duration::from_secs(5));
    let slow = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.refresh(RefreshMode::Force).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    h.fake.delay(Endpoint::Summary, Duration::ZERO);
    h.clock.set_ms(2_000);
    let fast = ctl.refresh(RefreshMode::Force).await.unwrap();
    assert!(matches!(fast, RefreshReport::Refreshed { .. }));

    assert_eq!(slow.await.unwrap().unwrap(), RefreshReport::Superseded);
    assert_eq!(ctl.snapshot().unwrap().captured_at.timestamp_millis(), 2_000);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_in_flight_refresh() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    h.fake.delay(Endpoint::LeadTimes, Duration::from_secs(30));

    let pending = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.refresh(RefreshMode::Force).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    ctl.reset().unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, RefreshError::Cancelled));
    assert!(h.memory.is_empty(), "cancelled cycle must not repopulate the cache");
}

#[tokio::test(start_paused = true)]
async fn dropping_view_scope_cancels_its_request() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    h.fake.delay(Endpoint::LeadTimes, Duration::from_secs(30));

    let scope = ctl.view_scope();
    let token = scope.token().clone();
    let api = ctl.api().clone();
    let task = tokio::spawn(async move {
        let mut browser = LeadTimeBrowser::new(10);
        browser.sync(api.as_ref(), &token).await
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    drop(scope);

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_ticks_only_while_handle_lives() {
    let h = Harness::new();
    let ctl = h.ready_controller().await;
    h.clock.set_ms(400_000);

    let handle = ctl.spawn_auto_refresh();
    tokio::time::sleep(Duration::from_millis(150)).await;
    // First tick found a stale cache; the second one a fresh one.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctl.refresh_attempts(), 2);

    drop(handle);
    h.clock.set_ms(900_000);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ctl.refresh_attempts(), 2);
}
