use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::debug;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    debug!("GET /health - Health check");
    Json(json!({ "status": "OK", "node_id": state.node_id }))
}
