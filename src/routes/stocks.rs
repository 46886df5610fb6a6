use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{StockRefreshRecord, StockTaskStatus};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/records", get(list_records))
        .route("/:code/status", get(stock_status))
}

#[derive(Debug, Deserialize)]
struct RecordQuery {
    code: Option<String>,
    limit: Option<i64>,
}

/// GET /api/stocks/:code/status - Last refresh status for a stock
async fn stock_status(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StockTaskStatus>, AppError> {
    state
        .stock_worker
        .status(&code)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No refresh status for {}", code)))
}

/// GET /api/stocks/records?code=&limit= - Refresh audit records, newest first
async fn list_records(
    Query(query): Query<RecordQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<StockRefreshRecord>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state
        .stock_worker
        .store()
        .list_refresh_records(query.code.as_deref(), limit)
        .await?;
    Ok(Json(records))
}
