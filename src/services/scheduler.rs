use crate::cache::{keys, Cache};
use crate::config::CacheTtls;
use crate::errors::AppError;
use crate::models::{JobPayload, JobRuntime, TaskMessage};
use crate::services::distributor::Distributor;
use crate::services::message_queue::MessageQueue;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Submission side of the pipeline: dedup lock, runtime snapshot, durable row, enqueue.
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<MessageQueue>,
    distributor: Arc<Distributor>,
    ttls: CacheTtls,
    max_retry: i32,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<MessageQueue>,
        distributor: Arc<Distributor>,
        ttls: CacheTtls,
        max_retry: i32,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            distributor,
            ttls,
            max_retry,
        }
    }

    /// Submit one execution of `job`.
    ///
    /// Returns the execution id, or `None` when another submission owns the job or a
    /// write failed. A failed enqueue after the durable write also returns `None` but
    /// keeps the row and the dedup lock for the lost-task scan.
    pub async fn schedule_job(&self, job: &JobPayload) -> Result<Option<String>, AppError> {
        let execution_id = job
            .trace_id
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let dedup_key = keys::dedup(job.job_id);

        if !self
            .cache
            .set_nx_ex(&dedup_key, &execution_id, self.ttls.dedup)
            .await?
        {
            info!("[SCHED_DEDUP] job={} already submitted, skipping", job.job_id);
            return Ok(None);
        }

        match self.store.find_active_runtime(job.job_id).await {
            Ok(Some(active)) => {
                warn!(
                    "[SCHED_ACTIVE] job={} still has active execution {} ({:?})",
                    job.job_id, active.execution_id, active.status
                );
                self.release_dedup(&dedup_key, &execution_id).await;
                return Ok(None);
            }
            Ok(None) => {}
            Err(e) => {
                self.release_dedup(&dedup_key, &execution_id).await;
                return Err(e);
            }
        }

        let payload = serde_json::to_string(job)?;
        let runtime = JobRuntime::waiting(&execution_id, job, self.max_retry, payload);

        // Stage a: cache snapshot
        let snapshot = serde_json::to_string(&runtime)?;
        let snapshot_key = keys::runtime(&execution_id);
        if let Err(e) = self
            .cache
            .set_ex(&snapshot_key, &snapshot, self.ttls.runtime_snapshot)
            .await
        {
            error!("[SCHED_SNAPSHOT] job={} snapshot failed: {}", job.job_id, e);
            self.release_dedup(&dedup_key, &execution_id).await;
            return Ok(None);
        }

        // Stage b: durable row
        if let Err(e) = self.store.insert_runtime(&runtime).await {
            error!("[SCHED_PERSIST] job={} runtime insert failed: {}", job.job_id, e);
            if let Err(e) = self.cache.delete(&snapshot_key).await {
                warn!("[SCHED_ROLLBACK] snapshot {} not removed: {}", snapshot_key, e);
            }
            self.release_dedup(&dedup_key, &execution_id).await;
            return Ok(None);
        }

        // Stage c: enqueue, never rolled back
        let mut message = TaskMessage::new(job.clone(), &execution_id, true);
        message.scheduled_time = runtime.scheduled_time;
        let enqueued = match self.distributor.select_target_node(false).await {
            Ok(target) => {
                message.target_node = target;
                self.queue.enqueue_now(&message).await
            }
            Err(e) => Err(e),
        };

        match enqueued {
            Ok(true) => {
                info!(
                    "📤 [SCHED_SUBMITTED] job={} execution={} target={}",
                    job.job_id,
                    execution_id,
                    message.target_node.as_deref().unwrap_or("any")
                );
                Ok(Some(execution_id))
            }
            Ok(false) => {
                warn!(
                    "[SCHED_ENQUEUE] job={} execution={} not enqueued (task pending), row kept for recovery",
                    job.job_id, execution_id
                );
                Ok(None)
            }
            Err(e) => {
                error!(
                    "[SCHED_ENQUEUE] job={} execution={} enqueue failed, row kept for recovery: {}",
                    job.job_id, execution_id, e
                );
                Ok(None)
            }
        }
    }

    async fn release_dedup(&self, key: &str, execution_id: &str) {
        if let Err(e) = self.cache.compare_and_delete(key, execution_id).await {
            warn!("[SCHED_ROLLBACK] dedup lock {} not released: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::{Priority, RuntimeStatus};
    use crate::services::node_registry::NodeRegistry;
    use crate::services::worker_pool::WorkerPool;
    use crate::store::MemoryJobStore;
    use std::time::Duration;

    fn job(id: i64) -> JobPayload {
        JobPayload {
            job_id: id,
            name: format!("job-{}", id),
            group_name: "g".into(),
            invoke_target: "noop".into(),
            concurrent: false,
            master_only: false,
            priority: Priority::Normal,
            trace_id: None,
        }
    }

    fn scheduler(store: Arc<MemoryJobStore>, cache: Arc<dyn Cache>) -> JobScheduler {
        let pool = Arc::new(WorkerPool::new(2));
        let registry = Arc::new(NodeRegistry::new(
            "node-a",
            cache.clone(),
            pool.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let queue = Arc::new(MessageQueue::new("node-a", cache.clone(), 3, Duration::from_secs(300)));
        let distributor = Arc::new(Distributor::new(registry, queue.clone(), pool, 0.8));
        JobScheduler::new(store, cache, queue, distributor, CacheTtls::default(), 3)
    }

    #[tokio::test]
    async fn test_second_submission_is_deduplicated() {
        let store = Arc::new(MemoryJobStore::new());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let s = scheduler(store.clone(), cache.clone());

        let first = s.schedule_job(&job(42)).await.unwrap();
        assert!(first.is_some());
        assert!(s.schedule_job(&job(42)).await.unwrap().is_none());

        let rows = store.runtimes();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RuntimeStatus::Waiting);
        assert_eq!(Some(rows[0].execution_id.clone()), first);
        assert!(cache.exists(&keys::runtime(&rows[0].execution_id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_trace_id_becomes_execution_id() {
        let store = Arc::new(MemoryJobStore::new());
        let s = scheduler(store, Arc::new(MemoryCache::new()));
        let mut payload = job(1);
        payload.trace_id = Some("trace-123".into());
        assert_eq!(s.schedule_job(&payload).await.unwrap().as_deref(), Some("trace-123"));
    }

    #[tokio::test]
    async fn test_active_row_blocks_submission_after_lock_expiry() {
        let store = Arc::new(MemoryJobStore::new());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let s = scheduler(store.clone(), cache.clone());

        s.schedule_job(&job(7)).await.unwrap().unwrap();
        cache.delete(&keys::dedup(7)).await.unwrap();

        assert!(s.schedule_job(&job(7)).await.unwrap().is_none());
        assert!(!cache.exists(&keys::dedup(7)).await.unwrap());
        assert_eq!(store.runtimes().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejection_keeps_row_and_lock() {
        let store = Arc::new(MemoryJobStore::new());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        cache.sadd(keys::PENDING, "g.job-5").await.unwrap();
        let s = scheduler(store.clone(), cache.clone());

        assert!(s.schedule_job(&job(5)).await.unwrap().is_none());
        assert_eq!(store.runtimes().len(), 1);
        assert!(cache.exists(&keys::dedup(5)).await.unwrap());
    }
}
