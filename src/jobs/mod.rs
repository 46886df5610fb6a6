//! Concrete job handlers.
//!
//! Each job is a plain `async fn(JobContext) -> Result<JobResult, AppError>` registered
//! under the `invoke_target` that job definitions refer to.
//!
//! - `stock_refresh_job` - refreshes every watch stock through the per-stock worker
//! - `log_cleanup_job` - prunes old execution logs

pub mod log_cleanup_job;
pub mod stock_refresh_job;

use crate::services::handlers::HandlerRegistry;

pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register_fn(stock_refresh_job::TARGET, stock_refresh_job::run_stock_refresh);
    registry.register_fn(log_cleanup_job::TARGET, log_cleanup_job::run_log_cleanup);
}
