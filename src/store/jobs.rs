use super::{JobStore, DEFAULT_LOG_LIMIT};
use crate::db::{execution_log_queries, job_queries, runtime_queries};
use crate::errors::AppError;
use crate::models::{
    CreateJob, JobDefinition, JobExecutionLog, JobRuntime, LogQuery, NewExecutionLog, UpdateJob,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &CreateJob) -> Result<JobDefinition, AppError> {
        job_queries::create_job(&self.pool, job).await.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(format!("job {} already exists", job.name))
            }
            other => AppError::Db(other),
        })
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>, AppError> {
        Ok(job_queries::get_job(&self.pool, id).await?)
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, AppError> {
        Ok(job_queries::list_jobs(&self.pool).await?)
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<JobDefinition>, AppError> {
        Ok(job_queries::list_enabled_jobs(&self.pool).await?)
    }

    async fn update_job(&self, id: i64, update: &UpdateJob) -> Result<Option<JobDefinition>, AppError> {
        Ok(job_queries::update_job(&self.pool, id, update).await?)
    }

    async fn set_job_enabled(&self, id: i64, enabled: bool) -> Result<Option<JobDefinition>, AppError> {
        Ok(job_queries::set_job_enabled(&self.pool, id, enabled).await?)
    }

    async fn delete_job(&self, id: i64) -> Result<bool, AppError> {
        Ok(job_queries::delete_job(&self.pool, id).await?)
    }

    async fn insert_runtime(&self, runtime: &JobRuntime) -> Result<(), AppError> {
        Ok(runtime_queries::insert_runtime(&self.pool, runtime).await?)
    }

    async fn get_runtime(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError> {
        Ok(runtime_queries::get_runtime(&self.pool, execution_id).await?)
    }

    async fn find_active_runtime(&self, job_id: i64) -> Result<Option<JobRuntime>, AppError> {
        Ok(runtime_queries::find_active_for_job(&self.pool, job_id).await?)
    }

    async fn list_active_runtimes(&self) -> Result<Vec<JobRuntime>, AppError> {
        Ok(runtime_queries::list_active(&self.pool).await?)
    }

    async fn list_running_for_node(&self, node_id: &str) -> Result<Vec<JobRuntime>, AppError> {
        Ok(runtime_queries::list_running_for_node(&self.pool, node_id).await?)
    }

    async fn claim_runtime(
        &self,
        execution_id: &str,
        node_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Option<JobRuntime>, AppError> {
        Ok(runtime_queries::claim(&self.pool, execution_id, node_id, start_time).await?)
    }

    async fn release_runtime(&self, execution_id: &str) -> Result<bool, AppError> {
        Ok(runtime_queries::release_to_waiting(&self.pool, execution_id).await?)
    }

    async fn mark_retrying(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError> {
        Ok(runtime_queries::mark_retrying(&self.pool, execution_id).await?)
    }

    async fn delete_runtime(&self, execution_id: &str) -> Result<bool, AppError> {
        Ok(runtime_queries::delete_runtime(&self.pool, execution_id).await?)
    }

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> Result<JobExecutionLog, AppError> {
        Ok(execution_log_queries::insert_log(&self.pool, log).await?)
    }

    async fn list_execution_logs(&self, query: &LogQuery) -> Result<Vec<JobExecutionLog>, AppError> {
        let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, 1000);
        Ok(execution_log_queries::list_logs(&self.pool, query, limit).await?)
    }

    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(execution_log_queries::delete_before(&self.pool, cutoff).await?)
    }
}
