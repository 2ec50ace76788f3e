use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use millboard_pipeline::api::{DashboardApi, HttpDashboardApi};
use millboard_pipeline::cache::FileStore;
use millboard_pipeline::clock::SystemClock;
use millboard_pipeline::config::SyncConfig;
use millboard_pipeline::controller::{Controller, Phase, ProcessingOutcome};
use millboard_pipeline::error::FetchError;
use millboard_pipeline::lead_time_browser::{FilterChange, LeadTimeBrowser};
use millboard_pipeline::types::{Endpoint, Stage};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn lead_time(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let page = params.get("page").cloned().unwrap_or_default();
    let stage = params.get("stage").cloned().unwrap_or_default();
    Json(json!({
        "data": [
            { "ITEM_CODE": format!("P{page}-{stage}"), "LEAD_TIME_SERIAL": "14", "LEAD_TIME_PARALLELIZED": 9 }
        ],
        "total": 25
    }))
}

async fn spawn_api(summary_delay: Duration) -> SocketAddr {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/dashboard-summary",
            get(move || async move {
                tokio::time::sleep(summary_delay).await;
                Json(json!({ "summary": { "jobs": { "all_jobs": [
                    { "ITEM_CODE": "X1", "STAGE": "RFD", "PROCESS": "Grinding", "QUANTITY": 3, "URGENCY": "HIGH" }
                ]}}}))
            }),
        )
        .route("/lead-time", get(lead_time))
        .route(
            "/stock-vs-demand",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/optimized-parallelization", get(|| async { "<html>oops</html>" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    addr
}

fn client(addr: SocketAddr, timeout: Duration) -> HttpDashboardApi {
    HttpDashboardApi::new(format!("http://{addr}/"), timeout)
}

#[tokio::test]
async fn http_errors_map_to_fetch_errors() {
    let addr = spawn_api(Duration::ZERO).await;
    let api = client(addr, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    api.probe(&cancel).await.expect("health ok");

    let err = api.get_json(Endpoint::StockStatus, &[], &cancel).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));

    let err = api
        .get_json(Endpoint::ParallelizationPairs, &[], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::MalformedBody { .. }));
}

#[tokio::test]
async fn client_timeout_is_a_transport_error() {
    let addr = spawn_api(Duration::from_secs(3)).await;
    let api = client(addr, Duration::from_millis(200));
    let err = api
        .get_json(Endpoint::Summary, &[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }));
}

#[tokio::test]
async fn browser_sends_server_filters_as_query_params() {
    let addr = spawn_api(Duration::ZERO).await;
    let api = client(addr, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let mut browser = LeadTimeBrowser::new(10);
    browser.set_filter(FilterChange::Stage(Some(Stage::WipMc)));
    browser.set_page(2);
    browser.sync(&api, &cancel).await.unwrap();

    let view = browser.view();
    assert_eq!(view.server_total, 25);
    assert_eq!(view.total_pages, 3);
    assert_eq!(view.rows[0].item_code, "P2-WIP_MC");
    assert_eq!(view.rows[0].serial_lead_time_days, 14.0);
}

#[tokio::test]
async fn controller_over_http_persists_partial_snapshot_to_disk() {
    let addr = spawn_api(Duration::ZERO).await;
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        settle_delay: Duration::ZERO,
        cache_dir: dir.path().to_path_buf(),
        ..SyncConfig::default()
    };
    let store = FileStore::open(dir.path()).unwrap();
    let ctl = Controller::new(
        config.clone(),
        Arc::new(client(addr, Duration::from_secs(5))),
        Arc::new(store.clone()),
        Arc::new(SystemClock),
    );

    ctl.start().await;
    ctl.begin_processing().unwrap();
    let phase = ctl
        .on_external_processing_complete(ProcessingOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(phase, Phase::Ready);

    let mut degraded = ctl.status().degraded;
    degraded.sort();
    assert_eq!(degraded, vec![Endpoint::StockStatus, Endpoint::ParallelizationPairs]);
    assert_eq!(ctl.snapshot().unwrap().jobs[0].item_code, "X1");
    assert!(dir.path().join("cached_dashboard_data.json").exists());

    let restarted = Controller::new(
        config,
        Arc::new(client(addr, Duration::from_secs(5))),
        Arc::new(store),
        Arc::new(SystemClock),
    );
    assert_eq!(restarted.start().await, Phase::Ready);
    assert_eq!(restarted.refresh_attempts(), 0);
}
