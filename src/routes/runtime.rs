use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::errors::AppError;
use crate::models::JobRuntime;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_runtimes))
        .route("/:execution_id", get(get_runtime))
}

/// GET /api/runtime - Executions that are waiting, running or retrying
async fn list_runtimes(State(state): State<AppState>) -> Result<Json<Vec<JobRuntime>>, AppError> {
    Ok(Json(state.management.list_runtimes().await?))
}

async fn get_runtime(
    Path(execution_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobRuntime>, AppError> {
    Ok(Json(state.management.get_runtime(&execution_id).await?))
}
