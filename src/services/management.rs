use crate::errors::AppError;
use crate::models::{
    ClusterView, CreateJob, JobDefinition, JobExecutionLog, JobRuntime, LogQuery, QueueStats, UpdateJob,
};
use crate::services::handlers::HandlerRegistry;
use crate::services::message_queue::{MessageQueue, RecentCompletion};
use crate::services::node_registry::NodeRegistry;
use crate::services::scheduler::JobScheduler;
use crate::services::trigger::{validate_cron, CronTrigger};
use crate::store::JobStore;
use std::sync::Arc;
use tracing::info;

/// Operator-facing operations behind the HTTP routes.
pub struct ManagementService {
    store: Arc<dyn JobStore>,
    scheduler: Arc<JobScheduler>,
    trigger: Arc<CronTrigger>,
    queue: Arc<MessageQueue>,
    nodes: Arc<NodeRegistry>,
    handlers: Arc<HandlerRegistry>,
}

impl ManagementService {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<JobScheduler>,
        trigger: Arc<CronTrigger>,
        queue: Arc<MessageQueue>,
        nodes: Arc<NodeRegistry>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            store,
            scheduler,
            trigger,
            queue,
            nodes,
            handlers,
        }
    }

    fn validate_target(&self, target: &str) -> Result<(), AppError> {
        if !self.handlers.contains(target) {
            return Err(AppError::Validation(format!(
                "Unknown invoke target '{}', expected one of {:?}",
                target,
                self.handlers.targets()
            )));
        }
        Ok(())
    }

    pub async fn create_job(&self, job: CreateJob) -> Result<JobDefinition, AppError> {
        if job.name.trim().is_empty() {
            return Err(AppError::Validation("Job name must not be empty".to_string()));
        }
        if job.name.contains('.') || job.group_name.as_deref().is_some_and(|g| g.contains('.')) {
            return Err(AppError::Validation("Job name and group must not contain '.'".to_string()));
        }
        self.validate_target(&job.invoke_target)?;
        if let Some(cron) = job.cron_expression.as_deref() {
            validate_cron(cron)?;
        }

        let created = self.store.create_job(&job).await?;
        self.trigger.register(&created).await?;
        info!("🆕 Job {} created as {}", created.task_id(), created.id);
        Ok(created)
    }

    pub async fn get_job(&self, id: i64) -> Result<JobDefinition, AppError> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobDefinition>, AppError> {
        self.store.list_jobs().await
    }

    pub async fn update_job(&self, id: i64, update: UpdateJob) -> Result<JobDefinition, AppError> {
        if let Some(target) = update.invoke_target.as_deref() {
            self.validate_target(target)?;
        }
        if let Some(Some(cron)) = update.cron_expression.as_ref() {
            validate_cron(cron)?;
        }

        let updated = self
            .store
            .update_job(id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        self.trigger.register(&updated).await?;
        Ok(updated)
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<JobDefinition, AppError> {
        let job = self
            .store
            .set_job_enabled(id, enabled)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        self.trigger.register(&job).await?;
        info!(
            "Job {} {}",
            job.task_id(),
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(job)
    }

    pub async fn delete_job(&self, id: i64) -> Result<(), AppError> {
        self.trigger.unregister(id).await?;
        if !self.store.delete_job(id).await? {
            return Err(AppError::NotFound(format!("Job {} not found", id)));
        }
        info!("🗑️  Job {} deleted", id);
        Ok(())
    }

    /// Submit one execution immediately. `Conflict` when a submission is already in flight.
    pub async fn run_now(&self, id: i64, trace_id: Option<String>) -> Result<String, AppError> {
        let job = self.get_job(id).await?;
        let mut payload = job.to_payload();
        payload.trace_id = trace_id;

        self.scheduler
            .schedule_job(&payload)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Job {} is already scheduled or running", job.task_id())))
    }

    pub async fn list_runtimes(&self) -> Result<Vec<JobRuntime>, AppError> {
        self.store.list_active_runtimes().await
    }

    pub async fn get_runtime(&self, execution_id: &str) -> Result<JobRuntime, AppError> {
        self.store
            .get_runtime(execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution {} has no runtime row", execution_id)))
    }

    pub async fn list_logs(&self, query: &LogQuery) -> Result<Vec<JobExecutionLog>, AppError> {
        self.store.list_execution_logs(query).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        self.queue.stats().await
    }

    pub async fn recent_completions(&self) -> Result<Vec<RecentCompletion>, AppError> {
        self.queue.recent_completions().await
    }

    pub async fn cluster(&self) -> Result<ClusterView, AppError> {
        self.nodes.cluster_view().await
    }
}
