use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::routes::{cluster, health, jobs, logs, runtime, stocks};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/jobs", jobs::router())
        .nest("/api/runtime", runtime::router())
        .nest("/api/logs", logs::router())
        .nest("/api/cluster", cluster::router())
        .nest("/api/stocks", stocks::router())
        .layer(cors)
        .with_state(state)
}
