/// Built-in job targets run through the full scheduling path.
mod common;

use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};
use common::{drain, Cluster};
use money_scheduler::jobs::{log_cleanup_job, stock_refresh_job};
use money_scheduler::models::{
    ExecutionStatus, NewExecutionLog, StockTaskState, TaskMessage, WatchStock,
};
use money_scheduler::store::{JobStore, StockStore};

fn moutai(threshold: Option<f64>) -> WatchStock {
    WatchStock {
        id: 1,
        code: "600519".into(),
        name: "Moutai".into(),
        api_url: Some("https://quotes.example.com/api/qt/stock/get?secid=1.600519".into()),
        new_price: None,
        prev_close: None,
        open_price: None,
        high_price: None,
        low_price: None,
        volume: None,
        threshold_price: threshold,
        notify_count: 0,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_redelivered_stock_refresh_fetches_once() {
    let cluster = Cluster::new();
    cluster.stock_store.insert_watch_stock(moutai(Some(1680.0)));
    let job = cluster.create_job("refresh", stock_refresh_job::TARGET).await;
    let a = cluster.node("node-a").await;

    let mut payload = job.to_payload();
    payload.trace_id = Some("trace-1".to_string());
    let execution_id = a.scheduler.schedule_job(&payload).await.unwrap().unwrap();
    assert_eq!(execution_id, "trace-1");
    drain(&a).await;

    // The broker hands the same execution out again.
    let redelivered = TaskMessage::new(payload, "trace-1", false);
    assert!(a.queue.enqueue_now(&redelivered).await.unwrap());
    drain(&a).await;

    assert_eq!(cluster.quotes.calls.load(Ordering::SeqCst), 1);
    let records = cluster
        .stock_store
        .list_refresh_records(Some("600519"), 10)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trace_id, "trace-1");
    assert_eq!(records[0].execute_result, "Price=1700");

    let stock = cluster.stock_store.get_watch_stock("600519").await.unwrap().unwrap();
    assert_eq!(stock.new_price, Some(1700.0));
    assert_eq!(stock.name, "Kweichow Moutai");
    assert_eq!(stock.notify_count, 1);

    let status = a.stock_worker.status("600519").await.unwrap().unwrap();
    assert_eq!(status.status, StockTaskState::Success);
    assert_eq!(status.trace_id, "trace-1");

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == ExecutionStatus::Success));
}

#[tokio::test]
async fn test_log_cleanup_removes_only_expired_logs() {
    let cluster = Cluster::new();
    let old_end = Utc::now() - Duration::days(45);
    cluster
        .job_store
        .insert_execution_log(&NewExecutionLog {
            execution_id: "ancient".into(),
            job_id: 999,
            job_name: "gone".into(),
            job_group: "test".into(),
            status: ExecutionStatus::Success,
            node_id: "node-z".into(),
            scheduled_time: None,
            start_time: old_end,
            end_time: old_end,
            retry_count: 0,
            error_message: None,
            error_detail: None,
            payload: None,
        })
        .await
        .unwrap();

    let job = cluster.create_job("cleanup", log_cleanup_job::TARGET).await;
    let a = cluster.node("node-a").await;
    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    drain(&a).await;

    assert!(cluster.logs_for(999).is_empty());
    let own = cluster.logs_for(job.id);
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].status, ExecutionStatus::Success);
}
