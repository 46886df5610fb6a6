use crate::errors::AppError;
use crate::models::{StockRefreshTask, StockTaskState};
use crate::services::handlers::{JobContext, JobResult};
use crate::services::stock_refresh::RefreshOutcome;
use futures::stream::{self, StreamExt};
use tracing::{error, info};

pub const TARGET: &str = "stock.refresh";

/// Refreshes every watch stock, a few at a time.
///
/// The execution id is used as the trace id, so a redelivered execution skips the
/// stocks it already handled.
pub async fn run_stock_refresh(ctx: JobContext) -> Result<JobResult, AppError> {
    let stocks = ctx.deps.stock_store.list_watch_stocks().await?;
    if stocks.is_empty() {
        info!("No watch stocks to refresh");
        return Ok(JobResult::default());
    }

    info!(
        "Refreshing {} watch stocks (execution {})",
        stocks.len(),
        ctx.execution_id
    );

    let concurrency = ctx.deps.fan_out_concurrency.max(1);
    let outcomes: Vec<(String, Result<RefreshOutcome, AppError>)> = stream::iter(stocks)
        .map(|stock| {
            let worker = ctx.deps.stock_worker.clone();
            let task = StockRefreshTask {
                trace_id: ctx.execution_id.clone(),
                stock_code: stock.code,
            };
            async move {
                let outcome = worker.refresh(&task).await;
                (task.stock_code, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut processed = 0;
    let mut failed = 0;
    for (code, outcome) in outcomes {
        match outcome {
            Ok(RefreshOutcome::Completed(StockTaskState::Failed)) => failed += 1,
            Ok(_) => processed += 1,
            Err(e) => {
                error!("Stock {} refresh aborted: {}", code, e);
                failed += 1;
            }
        }
    }

    info!(
        "Stock refresh complete: {} processed, {} failed",
        processed, failed
    );

    Ok(JobResult {
        items_processed: processed,
        items_failed: failed,
    })
}
