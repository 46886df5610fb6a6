use crate::cache::{keys, Cache};
use crate::config::CacheTtls;
use crate::errors::AppError;
use crate::models::{task_id, ExecutionStatus, JobRuntime, NewExecutionLog, RuntimeStatus, TaskMessage};
use crate::services::executor::JobExecutor;
use crate::services::message_queue::MessageQueue;
use crate::services::worker_pool::WorkerPool;
use crate::store::JobStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Crash recovery: resets this node's orphaned rows at startup and resubmits rows
/// whose dedup lock has disappeared.
pub struct RecoveryService {
    node_id: String,
    store: Arc<dyn JobStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<MessageQueue>,
    executor: Arc<JobExecutor>,
    pool: Arc<WorkerPool>,
    ttls: CacheTtls,
}

impl RecoveryService {
    pub fn new(
        node_id: &str,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<MessageQueue>,
        executor: Arc<JobExecutor>,
        pool: Arc<WorkerPool>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            store,
            cache,
            queue,
            executor,
            pool,
            ttls,
        }
    }

    /// Runs once before the queue listener starts. Returns the number of rows reset.
    pub async fn startup(&self) -> Result<usize, AppError> {
        let orphans = self.store.list_running_for_node(&self.node_id).await?;
        let mut reset = 0;

        for row in &orphans {
            let task = task_id(&row.job_group, &row.job_name);
            self.cache
                .compare_and_delete(&keys::dedup(row.job_id), &row.execution_id)
                .await?;
            self.cache.delete(&keys::runtime(&row.execution_id)).await?;
            self.cache.delete(&keys::monitor(&task)).await?;
            self.cache.srem(keys::EXECUTING, &task).await?;

            if self.store.release_runtime(&row.execution_id).await? {
                warn!(
                    "🩹 [RECOVERY_STARTUP] execution={} job={} reset to WAITING after unclean stop",
                    row.execution_id, row.job_id
                );
                reset += 1;
            }
        }

        let requeued = self.queue.sweep_processing(true).await?;
        info!(
            "🩹 [RECOVERY_STARTUP] node {} reset {} rows, requeued {} unacknowledged messages",
            self.node_id, reset, requeued
        );
        Ok(reset)
    }

    /// One pass of the lost-task scan. Returns how many executions were resubmitted.
    pub async fn scan_once(&self) -> Result<usize, AppError> {
        let mut resubmitted = 0;

        for row in self.store.list_active_runtimes().await? {
            let dedup_key = keys::dedup(row.job_id);
            // Lock absent means no process owns this row.
            if !self
                .cache
                .set_nx_ex(&dedup_key, &row.execution_id, self.ttls.recovery_dedup)
                .await?
            {
                continue;
            }

            if row.status == RuntimeStatus::Running && self.lease_held(&row).await? {
                // The owner is alive and only its dedup lock lapsed.
                warn!(
                    "[RECOVERY_SKIP] execution={} job={} is running under a held lease",
                    row.execution_id, row.job_id
                );
                self.cache.compare_and_delete(&dedup_key, &row.execution_id).await?;
                continue;
            }

            let Some(row) = self.store.mark_retrying(&row.execution_id).await? else {
                self.cache.compare_and_delete(&dedup_key, &row.execution_id).await?;
                continue;
            };

            if row.retry_count > row.max_retry {
                self.give_up(&row, format!("retry budget of {} exhausted", row.max_retry))
                    .await?;
                continue;
            }

            let job = match row.decode_payload() {
                Ok(job) => job,
                Err(e) => {
                    self.give_up(&row, format!("payload snapshot unreadable: {}", e)).await?;
                    continue;
                }
            };

            let mut message = TaskMessage::new(job, &row.execution_id, true);
            message.retry_count = row.retry_count;
            message.scheduled_time = row.scheduled_time;

            warn!(
                "♻️  [RECOVERY_TRIGGER] execution={} job={} lost, resubmitting (retry {})",
                row.execution_id, row.job_id, row.retry_count
            );
            let executor = self.executor.clone();
            self.pool.submit(&message.task_id.clone(), async move {
                let execution_id = message.execution_id.clone();
                if let Err(e) = executor.execute_recovered(message).await {
                    error!("[RECOVERY_TRIGGER] execution={} failed to run: {}", execution_id, e);
                }
            });
            resubmitted += 1;
        }
        Ok(resubmitted)
    }

    /// Whether the execution lock of `row` is still held by that execution.
    async fn lease_held(&self, row: &JobRuntime) -> Result<bool, AppError> {
        let job_lock = self.cache.get(&keys::job_lock(row.job_id)).await?;
        if job_lock.as_deref() == Some(row.execution_id.as_str()) {
            return Ok(true);
        }
        self.cache.exists(&keys::execution_lock(&row.execution_id)).await
    }

    async fn give_up(&self, row: &JobRuntime, reason: String) -> Result<(), AppError> {
        error!(
            "❌ [RECOVERY_ABANDON] execution={} job={}: {}",
            row.execution_id, row.job_id, reason
        );
        let now = Utc::now();
        let log = NewExecutionLog {
            execution_id: row.execution_id.clone(),
            job_id: row.job_id,
            job_name: row.job_name.clone(),
            job_group: row.job_group.clone(),
            status: ExecutionStatus::Failed,
            node_id: self.node_id.clone(),
            scheduled_time: Some(row.scheduled_time),
            start_time: now,
            end_time: now,
            retry_count: row.retry_count,
            error_message: Some(reason),
            error_detail: None,
            payload: Some(row.payload.clone()),
        };
        self.store.insert_execution_log(&log).await?;
        self.store.delete_runtime(&row.execution_id).await?;
        self.cache.delete(&keys::runtime(&row.execution_id)).await?;
        self.cache
            .compare_and_delete(&keys::dedup(row.job_id), &row.execution_id)
            .await?;
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.scan_once().await {
                            Ok(0) => {}
                            Ok(n) => info!("♻️  [RECOVERY_SCAN] resubmitted {} lost executions", n),
                            Err(e) => error!("[RECOVERY_SCAN] failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
