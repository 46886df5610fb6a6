/// HTTP surface tests driven through the router without a listener.
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{Cluster, COUNT_TARGET};
use money_scheduler::app::create_app;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn app(cluster: &Cluster) -> Router {
    let node = cluster.node("node-a").await;
    create_app(node.app_state())
}

#[tokio::test]
async fn test_health_reports_node() {
    let cluster = Cluster::new();
    let app = app(&cluster).await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["node_id"], "node-a");
}

#[tokio::test]
async fn test_job_lifecycle_over_http() {
    let cluster = Cluster::new();
    let app = app(&cluster).await;

    let (status, created) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "name": "refresh", "group_name": "stock", "invoke_target": COUNT_TARGET })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["enabled"], true);

    let (status, run) = send(&app, "POST", &format!("/api/jobs/{}/run", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let execution_id = run["execution_id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", &format!("/api/jobs/{}/run", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, runtimes) = send(&app, "GET", "/api/runtime", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runtimes.as_array().unwrap().len(), 1);

    let (status, runtime) = send(&app, "GET", &format!("/api/runtime/{}", execution_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runtime["status"], "WAITING");

    let (status, stats) = send(&app, "GET", "/api/cluster/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["pending"], 1);

    let (status, disabled) = send(&app, "POST", &format!("/api/jobs/{}/disable", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(disabled["enabled"], false);

    let (status, _) = send(&app, "DELETE", &format!("/api/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/api/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_rejects_bad_definitions() {
    let cluster = Cluster::new();
    let app = app(&cluster).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "name": "mystery", "invoke_target": "no.such.target" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "name": "bad-cron", "invoke_target": COUNT_TARGET, "cron_expression": "soon" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "name": "a.b", "invoke_target": COUNT_TARGET })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_run_with_trace_id_uses_it_as_execution_id() {
    let cluster = Cluster::new();
    let app = app(&cluster).await;
    let job = cluster.create_job("traced", COUNT_TARGET).await;

    let (status, run) = send(
        &app,
        "POST",
        &format!("/api/jobs/{}/run", job.id),
        Some(json!({ "trace_id": "trace-77" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(run["execution_id"], "trace-77");
}
