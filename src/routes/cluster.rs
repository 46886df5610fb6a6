use axum::{extract::State, routing::get, Json, Router};

use crate::errors::AppError;
use crate::models::{ClusterView, QueueStats};
use crate::services::message_queue::RecentCompletion;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(cluster_view))
        .route("/queue", get(queue_stats))
        .route("/recent", get(recent_completions))
}

/// GET /api/cluster - Alive nodes and the current master
async fn cluster_view(State(state): State<AppState>) -> Result<Json<ClusterView>, AppError> {
    Ok(Json(state.management.cluster().await?))
}

async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.management.queue_stats().await?))
}

async fn recent_completions(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecentCompletion>>, AppError> {
    Ok(Json(state.management.recent_completions().await?))
}
