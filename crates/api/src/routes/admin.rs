//! Admin control plane: contract lifecycle, backfill triggers, status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use indexer_common::error::AppError;
use indexer_common::types::{
    AddContractRequest, AddContractResponse, IndexerStatusReport, TriggerBackfillRequest,
};
use indexer_core::backfill::BackfillRunner;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/contracts", post(add_contract))
        .route("/admin/contracts/{address}", delete(remove_contract))
        .route("/admin/contracts/{address}/pause", post(pause_contract))
        .route("/admin/contracts/{address}/resume", post(resume_contract))
        .route("/admin/backfill", post(trigger_backfill))
        .route("/admin/status", get(get_status))
}

async fn add_contract(
    State(state): State<AppState>,
    Json(req): Json<AddContractRequest>,
) -> Result<Json<AddContractResponse>, AppError> {
    Ok(Json(state.supervisor.add_contract(req).await?))
}

async fn remove_contract(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.supervisor.remove_contract(&address).await?;
    Ok(Json(serde_json::json!({ "removed": address })))
}

async fn pause_contract(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.supervisor.pause(&address).await?;
    Ok(Json(serde_json::json!({ "status": "paused" })))
}

async fn resume_contract(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.supervisor.resume(&address).await?;
    Ok(Json(serde_json::json!({ "status": "active" })))
}

#[derive(Serialize)]
struct TriggerBackfillResponse {
    job_id: Uuid,
}

/// Creates the job row, then runs it in a detached task so the admin call
/// returns immediately with a `job_id` the caller can poll.
async fn trigger_backfill(
    State(state): State<AppState>,
    Json(req): Json<TriggerBackfillRequest>,
) -> Result<Json<TriggerBackfillResponse>, AppError> {
    let runner = Arc::new(BackfillRunner::new(
        state.pool.clone(),
        Arc::clone(&state.chain),
        state.config.batch_size,
        state.rpc_deadline(),
    ));

    let job_id = runner
        .create_job(&req.address, req.from, req.to)
        .await?;

    let spawned = Arc::clone(&runner);
    tokio::spawn(async move {
        if let Err(e) = spawned.run(job_id, CancellationToken::new()).await {
            tracing::error!(job_id = %job_id, error = %e, "backfill job failed");
        }
    });

    Ok(Json(TriggerBackfillResponse { job_id }))
}

async fn get_status(State(state): State<AppState>) -> Json<IndexerStatusReport> {
    Json(state.supervisor.health().await)
}
