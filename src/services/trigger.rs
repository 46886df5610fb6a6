use crate::errors::AppError;
use crate::models::JobDefinition;
use crate::services::scheduler::JobScheduler;
use crate::store::JobStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler as CronScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Reject expressions the cron scheduler would not accept (six fields, seconds first).
pub fn validate_cron(expression: &str) -> Result<(), AppError> {
    Job::new_async(expression, |_uuid, _l| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| AppError::Validation(format!("Invalid cron expression '{}': {}", expression, e)))
}

/// Fires `schedule_job` for every enabled definition with a cron expression.
///
/// Every node registers the same triggers; the dedup lock lets one submission win.
pub struct CronTrigger {
    cron: CronScheduler,
    scheduler: Arc<JobScheduler>,
    store: Arc<dyn JobStore>,
    registered: DashMap<i64, Uuid>,
}

impl CronTrigger {
    pub async fn new(scheduler: Arc<JobScheduler>, store: Arc<dyn JobStore>) -> Result<Self, AppError> {
        let cron = CronScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;
        Ok(Self {
            cron,
            scheduler,
            store,
            registered: DashMap::new(),
        })
    }

    /// Register all enabled jobs and start firing.
    pub async fn start(&self) -> Result<(), AppError> {
        info!("🚀 Starting cron trigger...");
        let count = self.reload().await?;
        self.cron
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;
        info!("✅ Cron trigger started with {} jobs", count);
        Ok(())
    }

    /// Re-register every enabled definition. Returns how many have a trigger.
    pub async fn reload(&self) -> Result<usize, AppError> {
        let ids: Vec<i64> = self.registered.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.unregister(id).await?;
        }

        let mut count = 0;
        for job in self.store.list_enabled_jobs().await? {
            match self.register(&job).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!("⚠️  Job {} ({}) not scheduled: {}", job.id, job.task_id(), e),
            }
        }
        Ok(count)
    }

    /// Replace the trigger for `job`. Returns false when the job has no trigger to run.
    pub async fn register(&self, job: &JobDefinition) -> Result<bool, AppError> {
        self.unregister(job.id).await?;

        let Some(expression) = job.cron_expression.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(false);
        };
        if !job.enabled {
            return Ok(false);
        }

        let job_id = job.id;
        let scheduler = self.scheduler.clone();
        let store = self.store.clone();
        let cron_job = Job::new_async(expression, move |_uuid, _l| {
            let scheduler = scheduler.clone();
            let store = store.clone();
            Box::pin(async move {
                fire(scheduler, store, job_id).await;
            })
        })
        .map_err(|e| AppError::Validation(format!("Invalid cron expression '{}': {}", expression, e)))?;

        let uuid = self
            .cron
            .add(cron_job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job.task_id(), e)))?;
        self.registered.insert(job_id, uuid);

        info!("📅 Scheduled: {} [cron: {}]", job.task_id(), expression);
        Ok(true)
    }

    pub async fn unregister(&self, job_id: i64) -> Result<(), AppError> {
        if let Some((_, uuid)) = self.registered.remove(&job_id) {
            self.cron
                .remove(&uuid)
                .await
                .map_err(|e| AppError::External(format!("Failed to remove job {}: {}", job_id, e)))?;
        }
        Ok(())
    }

    pub fn is_registered(&self, job_id: i64) -> bool {
        self.registered.contains_key(&job_id)
    }

    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut cron = self.cron.clone();
        cron.shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        info!("✅ Cron trigger stopped");
        Ok(())
    }
}

async fn fire(scheduler: Arc<JobScheduler>, store: Arc<dyn JobStore>, job_id: i64) {
    // Read the definition at fire time so edits take effect without re-registering.
    let job = match store.get_job(job_id).await {
        Ok(Some(job)) if job.enabled => job,
        Ok(_) => return,
        Err(e) => {
            error!("❌ [TRIGGER] job={} definition not loaded: {}", job_id, e);
            return;
        }
    };

    match scheduler.schedule_job(&job.to_payload()).await {
        Ok(Some(execution_id)) => info!("⏰ [TRIGGER] {} fired as {}", job.task_id(), execution_id),
        Ok(None) => {}
        Err(e) => error!("❌ [TRIGGER] {} submission failed: {}", job.task_id(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cron_validation() {
        assert!(validate_cron("0 */5 * * * *").is_ok());
        assert!(validate_cron("every five minutes").is_err());
    }
}
