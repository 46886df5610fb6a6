use super::{JobStore, StockStore, DEFAULT_LOG_LIMIT};
use crate::errors::AppError;
use crate::models::{
    CreateJob, JobDefinition, JobExecutionLog, JobRuntime, LogQuery, NewExecutionLog,
    NewStockRefreshRecord, RuntimeStatus, StockRefreshRecord, StockTrade, UpdateJob, WatchStock,
    DEFAULT_GROUP,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<i64, JobDefinition>>,
    runtimes: RwLock<HashMap<String, JobRuntime>>,
    logs: RwLock<Vec<JobExecutionLog>>,
    next_job_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All runtime rows regardless of status.
    pub fn runtimes(&self) -> Vec<JobRuntime> {
        self.runtimes.read().values().cloned().collect()
    }

    pub fn execution_logs(&self) -> Vec<JobExecutionLog> {
        self.logs.read().clone()
    }
}

fn is_active(status: RuntimeStatus) -> bool {
    matches!(status, RuntimeStatus::Waiting | RuntimeStatus::Running | RuntimeStatus::Retrying)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &CreateJob) -> Result<JobDefinition, AppError> {
        let group_name = job.group_name.clone().unwrap_or_else(|| DEFAULT_GROUP.to_string());
        let mut jobs = self.jobs.write();
        if jobs.values().any(|j| j.name == job.name && j.group_name == group_name) {
            return Err(AppError::Conflict(format!("job {} already exists", job.name)));
        }
        let now = Utc::now();
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        let definition = JobDefinition {
            id,
            name: job.name.clone(),
            group_name,
            invoke_target: job.invoke_target.clone(),
            cron_expression: job.cron_expression.clone(),
            enabled: job.enabled,
            concurrent: job.concurrent,
            master_only: job.master_only,
            auto_replenish: job.auto_replenish,
            priority: job.priority,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(id, definition.clone());
        Ok(definition)
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>, AppError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, AppError> {
        Ok(self.jobs.read().values().cloned().collect())
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<JobDefinition>, AppError> {
        Ok(self.jobs.read().values().filter(|j| j.enabled).cloned().collect())
    }

    async fn update_job(&self, id: i64, update: &UpdateJob) -> Result<Option<JobDefinition>, AppError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            job.name = name.clone();
        }
        if let Some(group) = &update.group_name {
            job.group_name = group.clone();
        }
        if let Some(target) = &update.invoke_target {
            job.invoke_target = target.clone();
        }
        if let Some(cron) = &update.cron_expression {
            job.cron_expression = cron.clone();
        }
        if let Some(concurrent) = update.concurrent {
            job.concurrent = concurrent;
        }
        if let Some(master_only) = update.master_only {
            job.master_only = master_only;
        }
        if let Some(auto_replenish) = update.auto_replenish {
            job.auto_replenish = auto_replenish;
        }
        if let Some(priority) = update.priority {
            job.priority = priority;
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn set_job_enabled(&self, id: i64, enabled: bool) -> Result<Option<JobDefinition>, AppError> {
        let mut jobs = self.jobs.write();
        Ok(jobs.get_mut(&id).map(|job| {
            job.enabled = enabled;
            job.updated_at = Utc::now();
            job.clone()
        }))
    }

    async fn delete_job(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.jobs.write().remove(&id).is_some())
    }

    async fn insert_runtime(&self, runtime: &JobRuntime) -> Result<(), AppError> {
        let mut runtimes = self.runtimes.write();
        if runtimes.contains_key(&runtime.execution_id) {
            return Err(AppError::Conflict(format!(
                "runtime {} already exists",
                runtime.execution_id
            )));
        }
        runtimes.insert(runtime.execution_id.clone(), runtime.clone());
        Ok(())
    }

    async fn get_runtime(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError> {
        Ok(self.runtimes.read().get(execution_id).cloned())
    }

    async fn find_active_runtime(&self, job_id: i64) -> Result<Option<JobRuntime>, AppError> {
        Ok(self
            .runtimes
            .read()
            .values()
            .filter(|r| r.job_id == job_id && is_active(r.status))
            .min_by_key(|r| r.enqueue_time)
            .cloned())
    }

    async fn list_active_runtimes(&self) -> Result<Vec<JobRuntime>, AppError> {
        let mut rows: Vec<JobRuntime> = self
            .runtimes
            .read()
            .values()
            .filter(|r| is_active(r.status))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.enqueue_time);
        Ok(rows)
    }

    async fn list_running_for_node(&self, node_id: &str) -> Result<Vec<JobRuntime>, AppError> {
        Ok(self
            .runtimes
            .read()
            .values()
            .filter(|r| r.status == RuntimeStatus::Running && r.node_id.as_deref() == Some(node_id))
            .cloned()
            .collect())
    }

    async fn claim_runtime(
        &self,
        execution_id: &str,
        node_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Option<JobRuntime>, AppError> {
        let mut runtimes = self.runtimes.write();
        Ok(match runtimes.get_mut(execution_id) {
            Some(row) if row.status.is_claimable() => {
                row.status = RuntimeStatus::Running;
                row.node_id = Some(node_id.to_string());
                row.start_time = Some(start_time);
                Some(row.clone())
            }
            _ => None,
        })
    }

    async fn release_runtime(&self, execution_id: &str) -> Result<bool, AppError> {
        let mut runtimes = self.runtimes.write();
        Ok(match runtimes.get_mut(execution_id) {
            Some(row) if row.status == RuntimeStatus::Running => {
                row.status = RuntimeStatus::Waiting;
                row.node_id = None;
                row.start_time = None;
                true
            }
            _ => false,
        })
    }

    async fn mark_retrying(&self, execution_id: &str) -> Result<Option<JobRuntime>, AppError> {
        let mut runtimes = self.runtimes.write();
        Ok(match runtimes.get_mut(execution_id) {
            Some(row) if is_active(row.status) => {
                row.status = RuntimeStatus::Retrying;
                row.node_id = None;
                row.retry_count += 1;
                Some(row.clone())
            }
            _ => None,
        })
    }

    async fn delete_runtime(&self, execution_id: &str) -> Result<bool, AppError> {
        Ok(self.runtimes.write().remove(execution_id).is_some())
    }

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> Result<JobExecutionLog, AppError> {
        let id = self.next_log_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = log.clone().into_log(id);
        self.logs.write().push(row.clone());
        Ok(row)
    }

    async fn list_execution_logs(&self, query: &LogQuery) -> Result<Vec<JobExecutionLog>, AppError> {
        let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, 1000) as usize;
        let mut rows: Vec<JobExecutionLog> = self
            .logs
            .read()
            .iter()
            .filter(|l| query.job_id.map_or(true, |id| l.job_id == id))
            .filter(|l| query.execution_id.as_ref().map_or(true, |e| &l.execution_id == e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.end_time.cmp(&a.end_time).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut logs = self.logs.write();
        let before = logs.len();
        logs.retain(|l| l.end_time >= cutoff);
        Ok((before - logs.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryStockStore {
    stocks: RwLock<BTreeMap<String, WatchStock>>,
    trades: RwLock<Vec<StockTrade>>,
    records: RwLock<Vec<StockRefreshRecord>>,
    next_record_id: AtomicI64,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_watch_stock(&self, stock: WatchStock) {
        self.stocks.write().insert(stock.code.clone(), stock);
    }

    pub fn insert_trade(&self, trade: StockTrade) {
        self.trades.write().push(trade);
    }
}

#[async_trait]
impl StockStore for MemoryStockStore {
    async fn get_watch_stock(&self, code: &str) -> Result<Option<WatchStock>, AppError> {
        Ok(self.stocks.read().get(code).cloned())
    }

    async fn list_watch_stocks(&self) -> Result<Vec<WatchStock>, AppError> {
        Ok(self.stocks.read().values().cloned().collect())
    }

    async fn update_watch_stock(&self, stock: &WatchStock) -> Result<(), AppError> {
        let mut stocks = self.stocks.write();
        match stocks.get_mut(&stock.code) {
            Some(existing) => {
                *existing = stock.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("watch stock {}", stock.code))),
        }
    }

    async fn list_trades(&self, code: &str) -> Result<Vec<StockTrade>, AppError> {
        Ok(self
            .trades
            .read()
            .iter()
            .filter(|t| t.stock_code == code)
            .cloned()
            .collect())
    }

    async fn update_trade(&self, trade: &StockTrade) -> Result<(), AppError> {
        let mut trades = self.trades.write();
        if let Some(existing) = trades.iter_mut().find(|t| t.id == trade.id) {
            *existing = trade.clone();
        }
        Ok(())
    }

    async fn insert_refresh_record(&self, record: &NewStockRefreshRecord) -> Result<StockRefreshRecord, AppError> {
        let row = StockRefreshRecord {
            id: self.next_record_id.fetch_add(1, Ordering::SeqCst) + 1,
            stock_code: record.stock_code.clone(),
            stock_name: record.stock_name.clone(),
            status: record.status.as_str().to_string(),
            execute_result: record.execute_result.clone(),
            node_id: record.node_id.clone(),
            trace_id: record.trace_id.clone(),
            executed_at: Utc::now(),
        };
        self.records.write().push(row.clone());
        Ok(row)
    }

    async fn list_refresh_records(&self, code: Option<&str>, limit: i64) -> Result<Vec<StockRefreshRecord>, AppError> {
        let mut rows: Vec<StockRefreshRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| code.map_or(true, |c| r.stock_code == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobPayload, Priority};

    fn payload(job_id: i64) -> JobPayload {
        JobPayload {
            job_id,
            name: "refresh".into(),
            group_name: "stock".into(),
            invoke_target: "stock.refresh".into(),
            concurrent: false,
            master_only: false,
            priority: Priority::Normal,
            trace_id: None,
        }
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = MemoryJobStore::new();
        let row = JobRuntime::waiting("exec-1", &payload(1), 3, "{}".into());
        store.insert_runtime(&row).await.unwrap();

        let claimed = store.claim_runtime("exec-1", "node-a", Utc::now()).await.unwrap();
        assert!(claimed.is_some());
        let again = store.claim_runtime("exec-1", "node-b", Utc::now()).await.unwrap();
        assert!(again.is_none());

        assert!(store.release_runtime("exec-1").await.unwrap());
        let row = store.get_runtime("exec-1").await.unwrap().unwrap();
        assert_eq!(row.status, RuntimeStatus::Waiting);
        assert!(row.node_id.is_none());
    }

    #[tokio::test]
    async fn test_mark_retrying_bumps_count() {
        let store = MemoryJobStore::new();
        let row = JobRuntime::waiting("exec-1", &payload(1), 3, "{}".into());
        store.insert_runtime(&row).await.unwrap();

        let marked = store.mark_retrying("exec-1").await.unwrap().unwrap();
        assert_eq!(marked.status, RuntimeStatus::Retrying);
        assert_eq!(marked.retry_count, 1);
        assert!(store.claim_runtime("exec-1", "node-a", Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_job_name_conflicts() {
        let store = MemoryJobStore::new();
        let create = CreateJob {
            name: "refresh".into(),
            group_name: Some("stock".into()),
            invoke_target: "stock.refresh".into(),
            cron_expression: None,
            enabled: true,
            concurrent: false,
            master_only: false,
            auto_replenish: false,
            priority: Priority::Normal,
        };
        store.create_job(&create).await.unwrap();
        let err = store.create_job(&create).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
