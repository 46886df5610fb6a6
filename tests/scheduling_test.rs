/// End-to-end scheduling tests against in-memory backends.
///
/// Each test simulates one or more nodes sharing a cache and a job store and drives
/// the queue by hand, so outcomes are deterministic.
mod common;

use std::time::Duration;

use common::{
    drain, poll_in_background, Cluster, COUNT_TARGET, FAIL_TARGET, PANIC_TARGET, SLOW_TARGET,
};
use money_scheduler::cache::keys;
use money_scheduler::models::{
    Disposition, ExecutionStatus, RuntimeStatus, TaskMessage, UpdateJob, SKIP_LOCK_CONTENTION,
    SKIP_NOT_MASTER,
};
use money_scheduler::store::JobStore;
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_submissions_yield_one_execution() {
    let cluster = Cluster::new();
    let job = cluster.create_job("job42", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;
    let b = cluster.node("node-b").await;

    let payload = job.to_payload();
    let (first, second) = tokio::join!(
        a.scheduler.schedule_job(&payload),
        b.scheduler.schedule_job(&payload)
    );
    let results = [first.unwrap(), second.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);

    let rows = cluster.job_store.runtimes();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RuntimeStatus::Waiting);
    assert_eq!(rows[0].job_id, job.id);
}

#[tokio::test]
async fn test_scheduled_job_runs_and_retires_its_row() {
    let cluster = Cluster::new();
    let job = cluster.create_job("daily", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();

    // The durable row exists before anything consumes the message.
    let row = cluster.job_store.get_runtime(&execution_id).await.unwrap().unwrap();
    assert_eq!(row.status, RuntimeStatus::Waiting);
    assert_eq!(a.queue.stats().await.unwrap().pending, 1);

    assert_eq!(drain(&a).await, 1);
    assert_eq!(cluster.invocations(), 1);

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(logs[0].execution_id, execution_id);
    assert_eq!(logs[0].node_id, "node-a");

    assert!(cluster.job_store.runtimes().is_empty());
    assert!(!cluster.cache.exists(&keys::dedup(job.id)).await.unwrap());
    assert!(!cluster.cache.exists(&keys::runtime(&execution_id)).await.unwrap());

    let stats = a.queue.stats().await.unwrap();
    assert_eq!((stats.pending, stats.executing), (0, 0));
    assert_eq!(a.queue.recent_completions().await.unwrap().len(), 1);

    // The job can be submitted again once the previous execution is done.
    assert!(a.scheduler.schedule_job(&job.to_payload()).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Execution outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lock_contention_is_logged_as_canceled() {
    let cluster = Cluster::new();
    let job = cluster.create_job("contended", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    cluster
        .cache
        .set_nx_ex(&keys::job_lock(job.id), "another-execution", Duration::from_secs(60))
        .await
        .unwrap();

    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    drain(&a).await;

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Canceled);
    assert_eq!(logs[0].error_message.as_deref(), Some(SKIP_LOCK_CONTENTION));
    assert_eq!(cluster.invocations(), 0);
    assert!(cluster.job_store.runtimes().is_empty());
}

#[tokio::test]
async fn test_contention_leaves_the_holders_markers() {
    let cluster = Cluster::new();
    let job = cluster.create_job("settlement", SLOW_TARGET).await;
    let task_id = job.task_id();
    let a = cluster.node("node-a").await;
    let b = cluster.node("node-b").await;

    b.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    let running = poll_in_background(&b);
    assert!(cluster.wait_for(|c| c.invocations() == 1).await);

    let disposition = a
        .executor
        .execute(TaskMessage::new(job.to_payload(), "other-execution", false))
        .await
        .unwrap();
    assert_eq!(disposition, Disposition::Done);

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Canceled);
    assert_eq!(logs[0].error_message.as_deref(), Some(SKIP_LOCK_CONTENTION));
    assert!(!a.executor.is_executing(&task_id));
    assert!(b.executor.is_executing(&task_id));
    assert!(cluster.cache.sismember(keys::EXECUTING, &task_id).await.unwrap());
    assert!(cluster.cache.exists(&keys::monitor(&task_id)).await.unwrap());

    assert!(running.await.unwrap());
    assert_eq!(cluster.invocations(), 1);
    assert!(!cluster.cache.sismember(keys::EXECUTING, &task_id).await.unwrap());
    assert!(!cluster.cache.exists(&keys::monitor(&task_id)).await.unwrap());
    assert!(!cluster.cache.exists(&keys::dedup(job.id)).await.unwrap());

    // Nothing stale blocks the next submission.
    b.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    assert_eq!(drain(&b).await, 1);
    assert_eq!(cluster.invocations(), 2);
}

#[tokio::test]
async fn test_master_only_job_needs_the_master_role() {
    let cluster = Cluster::new();
    let job = cluster.create_job("master-task", COUNT_TARGET).await;
    let job = cluster
        .job_store
        .update_job(
            job.id,
            &UpdateJob {
                master_only: Some(true),
                ..UpdateJob::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    let a = cluster.node("node-a").await;

    cluster
        .cache
        .set_ex(keys::MASTER, "node-z", Duration::from_secs(60))
        .await
        .unwrap();
    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    drain(&a).await;

    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Canceled);
    assert_eq!(logs[0].error_message.as_deref(), Some(SKIP_NOT_MASTER));

    cluster.cache.delete(keys::MASTER).await.unwrap();
    assert!(a.registry.try_elect().await.unwrap());
    a.scheduler.schedule_job(&job.to_payload()).await.unwrap().unwrap();
    drain(&a).await;

    assert_eq!(cluster.invocations(), 1);
    assert_eq!(cluster.logs_for(job.id).len(), 2);
}

#[tokio::test]
async fn test_handler_error_and_panic_are_recorded_as_failed() {
    let cluster = Cluster::new();
    let failing = cluster.create_job("failing", FAIL_TARGET).await;
    let panicking = cluster.create_job("panicking", PANIC_TARGET).await;
    let a = cluster.node("node-a").await;

    a.scheduler.schedule_job(&failing.to_payload()).await.unwrap().unwrap();
    a.scheduler.schedule_job(&panicking.to_payload()).await.unwrap().unwrap();
    assert_eq!(drain(&a).await, 2);

    let failed = cluster.logs_for(failing.id);
    assert_eq!(failed[0].status, ExecutionStatus::Failed);
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("quote service unreachable"));

    let panicked = cluster.logs_for(panicking.id);
    assert_eq!(panicked[0].status, ExecutionStatus::Failed);
    assert_eq!(panicked[0].error_message.as_deref(), Some("panic: boom"));

    assert!(cluster.job_store.runtimes().is_empty());
    assert_eq!(a.queue.stats().await.unwrap().executing, 0);
}

#[tokio::test]
async fn test_redelivered_message_for_retired_row_is_a_no_op() {
    let cluster = Cluster::new();
    let job = cluster.create_job("once", COUNT_TARGET).await;
    let a = cluster.node("node-a").await;

    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();
    drain(&a).await;

    let duplicate = TaskMessage::new(job.to_payload(), &execution_id, true);
    assert!(a.queue.enqueue_now(&duplicate).await.unwrap());
    drain(&a).await;

    assert_eq!(cluster.invocations(), 1);
    assert_eq!(cluster.logs_for(job.id).len(), 1);
}

#[tokio::test]
async fn test_overloaded_node_relays_to_idle_peer() {
    let cluster = Cluster::new();
    let job = cluster.create_job("shed", COUNT_TARGET).await;
    let mut config = Cluster::config("node-a");
    config.worker_pool_size = 1;
    let a = cluster.node_with(config).await;
    let b = cluster.node("node-b").await;

    // No node has published metrics yet, so the message lands in the any-node pool.
    let execution_id = a
        .scheduler
        .schedule_job(&job.to_payload())
        .await
        .unwrap()
        .unwrap();
    b.registry.heartbeat().await.unwrap();

    // Fill node-a's only slot.
    let (release, hold) = oneshot::channel::<()>();
    a.pool.submit("hold", async move {
        let _ = hold.await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(a.pool.load_factor() >= 1.0);

    assert_eq!(drain(&a).await, 1);
    assert_eq!(cluster.invocations(), 0);
    let row = cluster.job_store.get_runtime(&execution_id).await.unwrap().unwrap();
    assert_eq!(row.status, RuntimeStatus::Waiting);
    assert!(row.node_id.is_none());

    assert_eq!(drain(&b).await, 1);
    assert_eq!(cluster.invocations(), 1);
    let logs = cluster.logs_for(job.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].node_id, "node-b");
    assert!(cluster.job_store.runtimes().is_empty());

    let _ = release.send(());
    assert!(a.pool.shutdown(Duration::from_secs(1)).await);
}
