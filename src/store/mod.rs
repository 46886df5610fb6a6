//! Durable state behind async traits.
//!
//! Postgres is the production backend; the memory stores back single-node dev runs
//! and the integration tests. The job store is the source of truth for job existence
//! and runtime state.

mod jobs;
mod memory;
mod stocks;

pub use jobs::PgJobStore;
pub use memory::{MemoryJobStore, MemoryStockStore};
pub use stocks::PgStockStore;

use crate::errors::AppError;
use crate::models::{
    CreateJob, JobDefinition, JobExecutionLog, JobRuntime, LogQuery, NewExecutionLog,
    NewStockRefreshRecord, StockRefreshRecord, StockTrade, UpdateJob, WatchStock,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub const DEFAULT_LOG_LIMIT: i64 = 100;

#[async_trait]
pub trait JobStore: Send + Sync {
    // Definitions
    async fn create_job(&self, job: &CreateJob) -> Result<JobDefinition, AppError>;
    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>, AppError>;
    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, AppError>;
    async fn list_enabled_jobs(&self) -> Result<Vec<JobDefinition>, AppError>;
    async fn update_job(&self, id: i64, update: &UpdateJob) -> Result<Option<JobDefinition>, AppError>;
    async fn set_job_enabled(&self, id: i64, enabled: bool) -> Result<Option<JobDefinition>, AppError>;
    async fn delete_job(&self, id: i64) -> Result<bool, AppError>;

    // Runtime rows
    async fn insert_runtime(&self, runtime: &JobRuntime) -> Result<(), AppError>;
    async fn get_runtime(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError>;
    /// Any WAITING/RUNNING/RETRYING row for the job.
    async fn find_active_runtime(&self, job_id: i64) -> Result<Option<JobRuntime>, AppError>;
    async fn list_active_runtimes(&self) -> Result<Vec<JobRuntime>, AppError>;
    async fn list_running_for_node(&self, node_id: &str) -> Result<Vec<JobRuntime>, AppError>;
    /// WAITING/RETRYING -> RUNNING owned by `node_id`. `None` if the row is gone or already claimed.
    async fn claim_runtime(
        &self,
        execution_id: &str,
        node_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Option<JobRuntime>, AppError>;
    /// RUNNING -> WAITING with ownership cleared.
    async fn release_runtime(&self, execution_id: &str) -> Result<bool, AppError>;
    /// Active row -> RETRYING, ownership cleared, retry count bumped.
    async fn mark_retrying(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError>;
    async fn delete_runtime(&self, execution_id: &str) -> Result<bool, AppError>;

    // Execution log
    async fn insert_execution_log(&self, log: &NewExecutionLog) -> Result<JobExecutionLog, AppError>;
    async fn list_execution_logs(&self, query: &LogQuery) -> Result<Vec<JobExecutionLog>, AppError>;
    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get_watch_stock(&self, code: &str) -> Result<Option<WatchStock>, AppError>;
    async fn list_watch_stocks(&self) -> Result<Vec<WatchStock>, AppError>;
    async fn update_watch_stock(&self, stock: &WatchStock) -> Result<(), AppError>;
    async fn list_trades(&self, code: &str) -> Result<Vec<StockTrade>, AppError>;
    async fn update_trade(&self, trade: &StockTrade) -> Result<(), AppError>;
    async fn insert_refresh_record(&self, record: &NewStockRefreshRecord) -> Result<StockRefreshRecord, AppError>;
    async fn list_refresh_records(&self, code: Option<&str>, limit: i64) -> Result<Vec<StockRefreshRecord>, AppError>;
}
