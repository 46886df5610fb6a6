use crate::errors::AppError;
use crate::models::JobPayload;
use crate::services::stock_refresh::StockRefreshWorker;
use crate::store::{JobStore, StockStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Shared dependencies handed to every handler invocation.
#[derive(Clone)]
pub struct JobDeps {
    pub job_store: Arc<dyn JobStore>,
    pub stock_store: Arc<dyn StockStore>,
    pub stock_worker: Arc<StockRefreshWorker>,
    pub log_retention_days: i64,
    pub fan_out_concurrency: usize,
}

// Context passed to job functions
#[derive(Clone)]
pub struct JobContext {
    pub execution_id: String,
    pub job: JobPayload,
    pub node_id: String,
    pub retry_count: i32,
    pub deps: JobDeps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<JobResult, AppError>;
}

/// Adapts a plain `async fn(JobContext)` into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobResult, AppError>> + Send,
{
    async fn run(&self, ctx: JobContext) -> Result<JobResult, AppError> {
        (self.0)(ctx).await
    }
}

/// Lookup from a job's `invoke_target` to its handler, filled at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(target.to_string(), handler);
    }

    pub fn register_fn<F, Fut>(&mut self, target: &str, f: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobResult, AppError>> + Send + 'static,
    {
        self.register(target, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.handlers.contains_key(target)
    }

    pub fn targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: JobContext) -> Result<JobResult, AppError> {
        Ok(JobResult::default())
    }

    #[test]
    fn test_registry_resolves_by_target() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("sys.noop", noop);
        registry.register_fn("sys.other", noop);

        assert!(registry.get("sys.noop").is_some());
        assert!(registry.get("missing").is_none());
        assert!(registry.contains("sys.other"));
        assert_eq!(registry.targets(), vec!["sys.noop", "sys.other"]);
    }
}
