use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dvla::VehicleDetails;
use crate::errors::AppError;
use crate::jobs::bulk_run;
use crate::models::{CheckResult, MotStatusUpdate, Vrm};
use crate::mot::MotService;
use crate::store::postgres::BatchRunRow;
use crate::store::MotStatusStore;
use crate::AppState;

/// Cap on vehicles pulled from the store for a single API-triggered run.
const DEFAULT_STALE_LIMIT: i64 = 10_000;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Serialize)]
pub struct VehicleCheckResponse {
    pub registration: String,
    #[serde(flatten)]
    pub result: CheckResult,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
    pub persisted: bool,
}

#[derive(Deserialize, Default)]
pub struct StartBatchRequest {
    /// Explicit registrations. When absent, stale vehicles are taken from the store.
    pub registrations: Option<Vec<String>>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct StartBatchResponse {
    pub run_id: Uuid,
    pub submitted: usize,
}

#[derive(Deserialize)]
pub struct ListRunsParams {
    pub limit: Option<i64>,
}

// ── Handlers ─────────────────────────────────────────────────

fn parse_vrm(raw: &str) -> Result<Vrm, AppError> {
    Vrm::parse(raw).map_err(|e| AppError::InvalidRegistration(e.to_string()))
}

fn mot_service(state: &AppState) -> Result<MotService, AppError> {
    state
        .mot
        .clone()
        .ok_or(AppError::NotConfigured("MOT history API"))
}

/// GET /api/v1/vehicles/:vrm/mot checks one vehicle now and stores the result.
pub async fn check_vehicle(
    State(state): State<Arc<AppState>>,
    Path(vrm): Path<String>,
) -> Result<Json<VehicleCheckResponse>, AppError> {
    let vrm = parse_vrm(&vrm)?;
    let outcome = mot_service(&state)?.check(&vrm).await?;

    let persisted = match MotStatusUpdate::from_outcome(&outcome) {
        Some(update) => match state.db.record_status(&update).await {
            Ok(()) => true,
            Err(e) => {
                crate::metrics::global().record_persist_error();
                tracing::warn!(vrm = %vrm, "failed to persist MOT status: {:#}", e);
                false
            }
        },
        None => false,
    };

    Ok(Json(VehicleCheckResponse {
        registration: outcome.registration,
        result: outcome.result,
        latency_ms: outcome.latency_ms,
        checked_at: outcome.checked_at,
        persisted,
    }))
}

/// POST /api/v1/mot/batch starts a background bulk run.
pub async fn start_batch(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartBatchRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let mot = mot_service(&state)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let permit = state.run_guard.try_acquire().ok_or(AppError::RunInProgress)?;

    let registrations = match req.registrations {
        Some(list) => list,
        None => state
            .db
            .list_stale_registrations(
                state.config.stale_after_hours as i64,
                req.limit.unwrap_or(DEFAULT_STALE_LIMIT).clamp(1, DEFAULT_STALE_LIMIT),
            )
            .await
            .map_err(AppError::Internal)?,
    };

    let run_id = Uuid::new_v4();
    let submitted = registrations.len();
    tracing::info!(run_id = %run_id, submitted, "bulk MOT run requested via API");

    tokio::spawn(bulk_run::execute(
        state.clone(),
        mot,
        run_id,
        "api",
        registrations,
        permit,
    ));

    Ok((
        StatusCode::ACCEPTED,
        Json(StartBatchResponse { run_id, submitted }),
    ))
}

/// GET /api/v1/mot/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<Vec<BatchRunRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.db.list_batch_runs(limit).await?;
    Ok(Json(runs))
}

/// GET /api/v1/mot/runs/:id
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchRunRow>, AppError> {
    state
        .db
        .get_batch_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("batch run {}", id)))
}

/// GET /api/v1/dvla/vehicles/:vrm runs a DVLA enquiry, stored alongside MOT data.
pub async fn dvla_vehicle(
    State(state): State<Arc<AppState>>,
    Path(vrm): Path<String>,
) -> Result<Json<VehicleDetails>, AppError> {
    let vrm = parse_vrm(&vrm)?;
    let dvla = state
        .dvla
        .as_ref()
        .ok_or(AppError::NotConfigured("DVLA vehicle enquiry"))?;

    let details = dvla
        .lookup(&vrm)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vehicle {}", vrm)))?;

    if let Err(e) = state.db.upsert_vehicle_details(&details).await {
        tracing::warn!(vrm = %vrm, "failed to store DVLA details: {:#}", e);
    }

    Ok(Json(details))
}
