// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets, via
// tower::ServiceExt::oneshot.

use std::sync::{Arc, RwLock};

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt as _;

use factcheck_bot::api::{create_router, AppState};
use factcheck_bot::dispatch::CycleReport;
use factcheck_bot::quota::{ActionKind, MemoryStore, QuotaLedger, QuotaState};

const BODY_LIMIT: usize = 1024 * 1024;

async fn get(state: AppState, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = create_router(state).oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn health_returns_ok_json() {
    let (status, bytes) = get(AppState::default(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn last_cycle_serializes_the_published_report() {
    let report = CycleReport {
        started_at: Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap(),
        fetched: 4,
        factcheck_selected: 2,
        moreinfo_selected: 1,
        completed: 2,
        failed: 1,
        deferred: 0,
        duplicates: 0,
        posts_created: 5,
        seen_marked: true,
    };
    let state = AppState {
        last_cycle: Arc::new(RwLock::new(Some(report))),
        ..AppState::default()
    };

    let (status, bytes) = get(state, "/debug/last-cycle").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["fetched"], 4);
    assert_eq!(v["posts_created"], 5);
    assert_eq!(v["seen_marked"], true);
    assert_eq!(v["started_at"], "2024-11-05T12:00:00Z");
}

#[tokio::test]
async fn quota_route_shows_current_counters() {
    let now = Utc::now();
    let store = MemoryStore::with_state(QuotaState {
        hourly_points: 30,
        daily_points: 300,
        last_hour_reset: now,
        last_day_reset: now,
    });
    let ledger = QuotaLedger::new(store);
    ledger.track(ActionKind::Create).await.unwrap();
    let state = AppState {
        quota: Some(Arc::new(ledger)),
        ..AppState::default()
    };

    let (status, bytes) = get(state, "/debug/quota").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["hourlyPoints"], 33);
    assert_eq!(v["dailyPoints"], 303);
}

#[tokio::test]
async fn quota_route_is_null_without_ledger() {
    let (_, bytes) = get(AppState::default(), "/debug/quota").await;
    assert_eq!(bytes, b"null");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (status, _) = get(AppState::default(), "/analyze").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
