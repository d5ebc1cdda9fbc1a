use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::{CycleReport, CycleStatus};
use crate::quota::{QuotaLedger, QuotaState};

#[derive(Clone, Default)]
pub struct AppState {
    pub last_cycle: CycleStatus,
    /// Read-only view of the quota record; the dispatcher owns the writer.
    pub quota: Option<Arc<QuotaLedger>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/debug/last-cycle", get(debug_last_cycle))
        .route("/debug/quota", get(debug_quota))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "Fact checker bot is running" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn debug_last_cycle(State(state): State<AppState>) -> Json<Option<CycleReport>> {
    let last = match state.last_cycle.read() {
        Ok(guard) => guard.clone(),
        Err(_) => {
            tracing::warn!(target: "api", "cycle status lock poisoned");
            None
        }
    };
    Json(last)
}

async fn debug_quota(
    State(state): State<AppState>,
) -> Result<Json<Option<QuotaState>>, (StatusCode, String)> {
    let Some(ledger) = state.quota else {
        return Ok(Json(None));
    };
    ledger.snapshot().await.map(|s| Json(Some(s))).map_err(|e| {
        tracing::warn!(target: "api", error = %format!("{e:#}"), "quota snapshot failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "quota snapshot failed".to_string())
    })
}
