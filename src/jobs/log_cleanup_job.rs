use crate::errors::AppError;
use crate::services::handlers::{JobContext, JobResult};
use chrono::{Duration, Utc};
use tracing::info;

pub const TARGET: &str = "sys.log_cleanup";

/// Deletes execution logs older than the retention window.
pub async fn run_log_cleanup(ctx: JobContext) -> Result<JobResult, AppError> {
    let cutoff = Utc::now() - Duration::days(ctx.deps.log_retention_days.max(1));
    let deleted = ctx.deps.job_store.delete_logs_before(cutoff).await?;

    info!("🧹 Removed {} execution logs older than {}", deleted, cutoff);

    Ok(JobResult {
        items_processed: deleted.min(i32::MAX as u64) as i32,
        items_failed: 0,
    })
}
