use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::errors::AppError;
use crate::models::{JobExecutionLog, LogQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_logs))
}

/// GET /api/logs?job_id=&execution_id=&limit= - Terminal execution records, newest first
async fn list_logs(
    Query(query): Query<LogQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<JobExecutionLog>>, AppError> {
    Ok(Json(state.management.list_logs(&query).await?))
}
