/// Crash recovery and replenishment across simulated nodes.
mod common;

use chrono::Utc;
use common::{drain, poll_in_background, Cluster, COUNT_TARGET, SLOW_TARGET};
use money_scheduler::cache::keys;
use money_scheduler::models::{ExecutionStatus, RuntimeStatus, UpdateJob};
use money_scheduler::store::JobStore;

// ---------------------------------------------------------------------------
// Restart and lost-task scan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_node_crash_mid_execution_runs_exactly_once() {
    let cluster = Cluster::new();
    let job = cluster.create_job("nightly", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();

    // node-a takes the message and claims the row, then dies before finishing.
    let _in_flight = a.queue.claim_next().await.unwrap().unwrap();
    cluster
        .job_store
        .claim_runtime(&execution_id, "node-a", Utc::now())
        .await
        .unwrap()
        .unwrap();
    drop(a);

    let restarted = cluster.node("node-a").await;
    assert_eq!(restarted.recovery.startup().await.unwrap(), 1);

    let row = cluster.job_store.get_runtime(&execution_id).await.unwrap().unwrap();
    assert_eq!(row.status, RuntimeStatus::Waiting);
    assert!(row.node_id.is_none());
    assert!(!cluster.cache.exists(&keys::dedup(job.id)).await.unwrap());

    assert_eq!(restarted.recovery.scan_once().await.unwrap(), 1);
    assert!(
        cluster
            .wait_for(|c| c.logs_for(job.id).len() == 1 && c.job_store.runtimes().is_empty())
            .await
    );

    // The message requeued at startup now points at a retired row.
    drain(&restarted).await;

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(logs[0].retry_count, 1);
    assert_eq!(cluster.invocations(), 1);
    assert_eq!(restarted.recovery.scan_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_requeued_task_running_on_peer_is_not_resubmitted() {
    let cluster = Cluster::new();
    let job = cluster.create_job("ledger-close", SLOW_TARGET).await;
    let a = cluster.node("node-a").await;

    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();
    let _in_flight = a.queue.claim_next().await.unwrap().unwrap();
    cluster
        .job_store
        .claim_runtime(&execution_id, "node-a", Utc::now())
        .await
        .unwrap()
        .unwrap();
    drop(a);

    // node-a comes back and requeues its work; node-b picks it up.
    let restarted = cluster.node("node-a").await;
    assert_eq!(restarted.recovery.startup().await.unwrap(), 1);
    let b = cluster.node("node-b").await;
    let running = poll_in_background(&b);
    assert!(cluster.wait_for(|c| c.invocations() == 1).await);

    let row = cluster.job_store.get_runtime(&execution_id).await.unwrap().unwrap();
    assert_eq!(row.status, RuntimeStatus::Running);
    assert_eq!(row.node_id.as_deref(), Some("node-b"));
    assert!(cluster.cache.exists(&keys::dedup(job.id)).await.unwrap());
    assert_eq!(restarted.recovery.scan_once().await.unwrap(), 0);

    assert!(running.await.unwrap());
    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(cluster.invocations(), 1);
    assert!(cluster.job_store.runtimes().is_empty());
    assert_eq!(restarted.recovery.scan_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lost_task_is_resubmitted_once_per_cycle() {
    let cluster = Cluster::new();
    let job = cluster.create_job("orphan", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;
    let b = cluster.node("node-b").await;

    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    // Simulate the dedup lock expiring while the row is still active.
    cluster.cache.delete(&keys::dedup(job.id)).await.unwrap();

    let (first, second) = tokio::join!(a.recovery.scan_once(), b.recovery.scan_once());
    assert_eq!(first.unwrap() + second.unwrap(), 1);

    assert!(
        cluster
            .wait_for(|c| c.logs_for(job.id).len() == 1 && c.job_store.runtimes().is_empty())
            .await
    );
    assert_eq!(cluster.invocations(), 1);
    assert_eq!(cluster.logs_for(job.id)[0].retry_count, 1);
}

#[tokio::test]
async fn test_active_row_with_held_lock_is_left_alone() {
    let cluster = Cluster::new();
    let job = cluster.create_job("healthy", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(a.recovery.scan_once().await.unwrap(), 0);
    let row = cluster.job_store.get_runtime(&execution_id).await.unwrap().unwrap();
    assert_eq!(row.status, RuntimeStatus::Waiting);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn test_exhausted_retry_budget_is_logged_as_failed() {
    let cluster = Cluster::new();
    let job = cluster.create_job("hopeless", COUNT_TARGET).await;
    let mut config = Cluster::config("node-a");
    config.max_retry = 0;
    let a = cluster.node_with(config).await;

    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    cluster.cache.delete(&keys::dedup(job.id)).await.unwrap();

    assert_eq!(a.recovery.scan_once().await.unwrap(), 0);

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Failed);
    assert!(cluster.job_store.runtimes().is_empty());
    assert!(!cluster.cache.exists(&keys::dedup(job.id)).await.unwrap());
    assert_eq!(cluster.invocations(), 0);
}

// ---------------------------------------------------------------------------
// Replenishment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_replenishment_is_opt_in_and_master_only() {
    let cluster = Cluster::new();
    let perpetual = cluster.create_job("perpetual", COUNT_TARGET).await;
    cluster
        .job_store
        .update_job(
            perpetual.id,
            &UpdateJob {
                auto_replenish: Some(true),
                ..UpdateJob::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    let plain = cluster.create_job("plain", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    assert_eq!(a.replenishment.run_once().await.unwrap(), 0);

    assert!(a.registry.try_elect().await.unwrap());
    assert_eq!(a.replenishment.run_once().await.unwrap(), 1);
    assert!(a.queue.is_pending(&perpetual.task_id()).await.unwrap());
    assert!(!a.queue.is_pending(&plain.task_id()).await.unwrap());

    // Already pending, so the next pass adds nothing.
    assert_eq!(a.replenishment.run_once().await.unwrap(), 0);

    assert_eq!(drain(&a).await, 1);
    assert_eq!(cluster.invocations(), 1);
    assert_eq!(cluster.logs_for(perpetual.id).len(), 1);
    assert!(cluster.job_store.runtimes().is_empty());
}
