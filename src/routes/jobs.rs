use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::models::{CreateJob, JobDefinition, UpdateJob};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/:id", get(get_job).put(update_job).delete(delete_job))
        .route("/:id/enable", post(enable_job))
        .route("/:id/disable", post(disable_job))
        .route("/:id/run", post(run_job))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    trace_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    execution_id: String,
}

/// GET /api/jobs - List all job definitions
async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobDefinition>>, AppError> {
    Ok(Json(state.management.list_jobs().await?))
}

/// POST /api/jobs - Create a job definition
async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJob>,
) -> Result<(StatusCode, Json<JobDefinition>), AppError> {
    info!("POST /api/jobs - {}", body.name);
    let job = state.management.create_job(body).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobDefinition>, AppError> {
    Ok(Json(state.management.get_job(id).await?))
}

async fn update_job(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<UpdateJob>,
) -> Result<Json<JobDefinition>, AppError> {
    Ok(Json(state.management.update_job(id, body).await?))
}

async fn delete_job(Path(id): Path<i64>, State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.management.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_job(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobDefinition>, AppError> {
    Ok(Json(state.management.set_enabled(id, true).await?))
}

async fn disable_job(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobDefinition>, AppError> {
    Ok(Json(state.management.set_enabled(id, false).await?))
}

/// POST /api/jobs/:id/run - Submit one execution now (409 when already in flight)
async fn run_job(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> Result<(StatusCode, Json<RunResponse>), AppError> {
    let Json(request) = body.unwrap_or_default();
    info!("POST /api/jobs/{}/run", id);
    let execution_id = state.management.run_now(id, request.trace_id).await?;
    Ok((StatusCode::ACCEPTED, Json(RunResponse { execution_id })))
}
