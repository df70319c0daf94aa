//! Liveness/readiness endpoint reporting the composite status the admin
//! control plane's `get_status` operation describes.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.supervisor.health().await;
    Json(serde_json::json!({
        "status": if report.is_healthy { "ok" } else { "degraded" },
        "service": "indexer-api",
        "version": env!("CARGO_PKG_VERSION"),
        "indexer_lag": report.indexer_lag,
        "total_contracts": report.total_contracts,
        "total_events": report.total_events,
        "uptime_seconds": report.uptime_seconds,
        "services": report.services,
    }))
}
