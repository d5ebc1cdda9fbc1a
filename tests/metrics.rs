// tests/metrics.rs
//
// Prometheus exposition through the merged router. The recorder is global, so
// this file installs it once and keeps everything in a single test.

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use factcheck_bot::api::{create_router, AppState};
use factcheck_bot::metrics::Metrics;
use factcheck_bot::quota::{ActionKind, MemoryStore, QuotaLedger};

#[tokio::test]
async fn metrics_endpoint_contains_quota_series() {
    let metrics = Metrics::init().expect("install recorder");
    let app = create_router(AppState::default()).merge(metrics.router());

    let ledger = QuotaLedger::new(MemoryStore::new());
    ledger.track(ActionKind::Create).await.unwrap();

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for (name, expected) in [
        ("quota_hourly_budget_points", 5000.0),
        ("quota_daily_budget_points", 35000.0),
        ("quota_hourly_points", 3.0),
        ("quota_daily_points", 3.0),
    ] {
        assert_eq!(sample(&text, name), Some(expected), "series {name} in:\n{text}");
    }
}

fn sample(text: &str, name: &str) -> Option<f64> {
    text.lines()
        .filter(|l| !l.starts_with('#'))
        .find_map(|l| {
            let (series, value) = l.rsplit_once(' ')?;
            (series == name).then(|| value.parse().ok()).flatten()
        })
}
