use crate::cache::{keys, Cache};
use crate::errors::{truncate_error, AppError};
use crate::models::{
    Disposition, ExecutionStatus, NewExecutionLog, RuntimeStatus, TaskMessage, SKIP_LOCK_CONTENTION,
    SKIP_NOT_MASTER,
};
use crate::services::distributor::Distributor;
use crate::services::handlers::{HandlerRegistry, JobContext, JobDeps};
use crate::services::lock::{DistributedLock, LockGuard};
use crate::services::message_queue::MessageHandler;
use crate::services::monitoring::MonitoringService;
use crate::services::node_registry::NodeRegistry;
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs delivered tasks on this node and writes exactly one terminal log per attempt.
pub struct JobExecutor {
    node_id: String,
    store: Arc<dyn JobStore>,
    cache: Arc<dyn Cache>,
    lock: DistributedLock,
    dedup_ttl: Duration,
    monitoring: Arc<MonitoringService>,
    distributor: Arc<Distributor>,
    nodes: Arc<NodeRegistry>,
    handlers: Arc<HandlerRegistry>,
    deps: JobDeps,
    // task_id -> execution_id currently running here
    executing: DashMap<String, String>,
    error_max_len: usize,
}

struct Outcome {
    status: ExecutionStatus,
    error_message: Option<String>,
    error_detail: Option<String>,
}

impl Outcome {
    fn success() -> Self {
        Self {
            status: ExecutionStatus::Success,
            error_message: None,
            error_detail: None,
        }
    }

    fn canceled(reason: &str) -> Self {
        Self {
            status: ExecutionStatus::Canceled,
            error_message: Some(reason.to_string()),
            error_detail: None,
        }
    }

    fn failed(message: String, detail: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error_message: Some(message),
            error_detail: detail,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl JobExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: &str,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn Cache>,
        lock_lease: Duration,
        dedup_ttl: Duration,
        monitoring: Arc<MonitoringService>,
        distributor: Arc<Distributor>,
        nodes: Arc<NodeRegistry>,
        handlers: Arc<HandlerRegistry>,
        deps: JobDeps,
        error_max_len: usize,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            store,
            lock: DistributedLock::new(cache.clone(), lock_lease),
            cache,
            dedup_ttl,
            monitoring,
            distributor,
            nodes,
            handlers,
            deps,
            executing: DashMap::new(),
            error_max_len,
        }
    }

    pub fn is_executing(&self, task_id: &str) -> bool {
        self.executing.contains_key(task_id)
    }

    /// Entry point for messages delivered by the queue.
    pub async fn execute(&self, message: TaskMessage) -> Result<Disposition, AppError> {
        self.run_message(message, true).await
    }

    /// Entry point for the lost-task scan, which bypasses the queue.
    pub async fn execute_recovered(&self, message: TaskMessage) -> Result<Disposition, AppError> {
        self.cache.sadd(keys::EXECUTING, &message.task_id).await?;
        info!(
            "♻️  [EXEC_RECOVERED] task={} execution={} retry={}",
            message.task_id, message.execution_id, message.retry_count
        );
        self.run_message(message, false).await
    }

    async fn run_message(&self, message: TaskMessage, may_shed: bool) -> Result<Disposition, AppError> {
        match self.executing.entry(message.task_id.clone()) {
            Entry::Occupied(running) => {
                warn!(
                    "[EXEC_DUPLICATE] task={} already running here as {}, skipping {}",
                    message.task_id,
                    running.get(),
                    message.execution_id
                );
                return Ok(Disposition::Done);
            }
            Entry::Vacant(slot) => {
                slot.insert(message.execution_id.clone());
            }
        }

        let start_time = Utc::now();

        if message.tracked {
            match self.claim(&message, start_time).await {
                Ok(true) => {}
                Ok(false) => return Ok(Disposition::Done),
                Err(e) => {
                    self.executing.remove(&message.task_id);
                    return Err(e);
                }
            }
        }

        let lock_key = if message.job.concurrent {
            keys::execution_lock(&message.execution_id)
        } else {
            keys::job_lock(message.job.job_id)
        };

        let guard = match self.lock.try_acquire(&lock_key, &message.execution_id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                warn!(
                    "🔒 [EXEC_SKIP] task={} execution={} lock {} held elsewhere",
                    message.task_id, message.execution_id, lock_key
                );
                // EXECUTING and the monitor marker belong to the lock holder.
                self.executing.remove(&message.task_id);
                if self
                    .write_log(&message, start_time, Outcome::canceled(SKIP_LOCK_CONTENTION))
                    .await
                    && message.tracked
                {
                    self.retire(&message).await;
                }
                return Ok(Disposition::Done);
            }
            Err(e) => {
                self.abandon(&message).await;
                return Err(e);
            }
        };

        if let Err(e) = self.monitoring.record_task_start(&message.task_id).await {
            warn!("[EXEC_MONITOR] task={} start not recorded: {}", message.task_id, e);
        }

        let outcome = self.run_locked(&message, &guard, may_shed).await;
        if let Err(e) = guard.release().await {
            warn!("[EXEC_UNLOCK] {} release failed: {}", lock_key, e);
        }

        match outcome {
            Ok(Some(outcome)) => {
                self.finish(&message, start_time, outcome).await;
                Ok(Disposition::Done)
            }
            Ok(None) => Ok(Disposition::Relayed),
            Err(e) => {
                self.abandon(&message).await;
                Err(e)
            }
        }
    }

    /// `Ok(None)` means the message was relayed to another node.
    async fn run_locked(
        &self,
        message: &TaskMessage,
        guard: &LockGuard,
        may_shed: bool,
    ) -> Result<Option<Outcome>, AppError> {
        if message.job.master_only && !self.nodes.is_master().await? {
            info!(
                "[EXEC_SKIP] task={} execution={} is master-only",
                message.task_id, message.execution_id
            );
            return Ok(Some(Outcome::canceled(SKIP_NOT_MASTER)));
        }

        if may_shed
            && !self
                .distributor
                .should_execute_locally(&message.task_id, self.distributor.load_threshold())
        {
            if let Some(target) = self.distributor.select_target_node(true).await? {
                guard.release().await?;
                self.hand_off(message, target).await;
                return Ok(None);
            }
        }

        Ok(Some(self.invoke(message).await))
    }

    async fn hand_off(&self, message: &TaskMessage, target: String) {
        if message.tracked {
            if let Err(e) = self.store.release_runtime(&message.execution_id).await {
                warn!("[EXEC_RELAY] execution={} row not released: {}", message.execution_id, e);
            }
        }
        self.clear_markers(message).await;

        let mut relayed = message.clone();
        relayed.raw = None;
        match self.distributor.relay_to(relayed, Some(target.clone())).await {
            Ok(true) => info!(
                "🔀 [EXEC_DISPATCHED] task={} execution={} -> {}",
                message.task_id, message.execution_id, target
            ),
            Ok(false) => warn!(
                "[EXEC_DISPATCHED] task={} already pending, execution={} left for recovery",
                message.task_id, message.execution_id
            ),
            Err(e) => error!(
                "[EXEC_DISPATCHED] task={} execution={} relay failed, left for recovery: {}",
                message.task_id, message.execution_id, e
            ),
        }
    }

    async fn invoke(&self, message: &TaskMessage) -> Outcome {
        let Some(handler) = self.handlers.get(&message.job.invoke_target) else {
            error!(
                "❌ [EXEC_NO_HANDLER] task={} target={}",
                message.task_id, message.job.invoke_target
            );
            return Outcome::failed(
                format!("no handler registered for {}", message.job.invoke_target),
                None,
            );
        };

        let ctx = JobContext {
            execution_id: message.execution_id.clone(),
            job: message.job.clone(),
            node_id: self.node_id.clone(),
            retry_count: message.retry_count,
            deps: self.deps.clone(),
        };

        info!(
            "▶️  [EXEC_START] task={} execution={} target={}",
            message.task_id, message.execution_id, message.job.invoke_target
        );

        match AssertUnwindSafe(handler.run(ctx)).catch_unwind().await {
            Ok(Ok(result)) => {
                info!(
                    "✅ [EXEC_SUCCESS] task={} execution={} processed={} failed={}",
                    message.task_id, message.execution_id, result.items_processed, result.items_failed
                );
                Outcome::success()
            }
            Ok(Err(e)) => {
                let text = truncate_error(&e.to_string(), self.error_max_len);
                error!(
                    "❌ [EXEC_FAILED] task={} execution={}: {}",
                    message.task_id, message.execution_id, text
                );
                Outcome::failed(text, Some(truncate_error(&format!("{:?}", e), self.error_max_len)))
            }
            Err(panic) => {
                let text = truncate_error(&panic_message(panic.as_ref()), self.error_max_len);
                error!(
                    "💥 [EXEC_PANIC] task={} execution={}: {}",
                    message.task_id, message.execution_id, text
                );
                Outcome::failed(format!("panic: {}", text), None)
            }
        }
    }

    /// Take the row for this node. Returns false when the message is stale.
    ///
    /// The dedup lock is (re)taken first so the lost-task scan leaves a live row alone,
    /// e.g. one requeued by a restarted node after its startup recovery dropped the lock.
    async fn claim(&self, message: &TaskMessage, start_time: DateTime<Utc>) -> Result<bool, AppError> {
        let dedup_key = keys::dedup(message.job.job_id);
        let took_dedup = self
            .cache
            .set_nx_ex(&dedup_key, &message.execution_id, self.dedup_ttl)
            .await?;

        let claimed = match self
            .store
            .claim_runtime(&message.execution_id, &self.node_id, start_time)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                if took_dedup {
                    self.cache.compare_and_delete(&dedup_key, &message.execution_id).await?;
                }
                return Err(e);
            }
        };
        if claimed.is_some() {
            return Ok(true);
        }

        info!(
            "[EXEC_STALE] task={} execution={} has no claimable runtime row",
            message.task_id, message.execution_id
        );
        if took_dedup {
            self.cache.compare_and_delete(&dedup_key, &message.execution_id).await?;
        }
        let running_elsewhere = self
            .store
            .get_runtime(&message.execution_id)
            .await?
            .is_some_and(|row| row.status == RuntimeStatus::Running);
        if running_elsewhere {
            // Shared markers belong to whoever holds the row.
            self.executing.remove(&message.task_id);
        } else {
            self.clear_markers(message).await;
        }
        Ok(false)
    }

    /// Terminal log, then retire the row. The row stays when the log cannot be written.
    async fn finish(&self, message: &TaskMessage, start_time: DateTime<Utc>, outcome: Outcome) {
        let logged = self.write_log(message, start_time, outcome).await;
        // EXECUTING must be gone before the dedup lock is, or the next submission's
        // message would be taken for a duplicate.
        self.clear_markers(message).await;
        if logged && message.tracked {
            self.retire(message).await;
        }
    }

    async fn write_log(&self, message: &TaskMessage, start_time: DateTime<Utc>, outcome: Outcome) -> bool {
        let log = NewExecutionLog {
            execution_id: message.execution_id.clone(),
            job_id: message.job.job_id,
            job_name: message.job.name.clone(),
            job_group: message.job.group_name.clone(),
            status: outcome.status,
            node_id: self.node_id.clone(),
            scheduled_time: Some(message.scheduled_time),
            start_time,
            end_time: Utc::now(),
            retry_count: message.retry_count,
            error_message: outcome.error_message,
            error_detail: outcome.error_detail,
            payload: serde_json::to_string(&message.job).ok(),
        };

        match self.store.insert_execution_log(&log).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "[EXEC_LOG_FAILED] task={} execution={} terminal log not written: {}",
                    message.task_id, message.execution_id, e
                );
                false
            }
        }
    }

    async fn retire(&self, message: &TaskMessage) {
        if let Err(e) = self.store.delete_runtime(&message.execution_id).await {
            error!("[EXEC_RETIRE] execution={} row not deleted: {}", message.execution_id, e);
            return;
        }
        if let Err(e) = self.cache.delete(&keys::runtime(&message.execution_id)).await {
            warn!("[EXEC_RETIRE] execution={} snapshot not deleted: {}", message.execution_id, e);
        }
        if let Err(e) = self
            .cache
            .compare_and_delete(&keys::dedup(message.job.job_id), &message.execution_id)
            .await
        {
            warn!("[EXEC_RETIRE] job={} dedup lock not released: {}", message.job.job_id, e);
        }
    }

    /// Give a claimed row back after an infrastructure failure so the queue can retry it.
    async fn abandon(&self, message: &TaskMessage) {
        if message.tracked {
            if let Err(e) = self.store.release_runtime(&message.execution_id).await {
                warn!("[EXEC_ABANDON] execution={} row not released: {}", message.execution_id, e);
            }
        }
        self.clear_markers(message).await;
    }

    async fn clear_markers(&self, message: &TaskMessage) {
        self.executing.remove(&message.task_id);
        if let Err(e) = self.cache.srem(keys::EXECUTING, &message.task_id).await {
            warn!("[EXEC_CLEANUP] task={} executing marker kept: {}", message.task_id, e);
        }
        if let Err(e) = self.monitoring.record_task_complete(&message.task_id).await {
            warn!("[EXEC_CLEANUP] task={} monitor marker kept: {}", message.task_id, e);
        }
    }
}

#[async_trait]
impl MessageHandler for JobExecutor {
    async fn handle(&self, message: TaskMessage) -> Result<Disposition, AppError> {
        self.execute(message).await
    }
}
