//! Shared fixtures: scheduler nodes wired to in-memory backends.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use money_scheduler::cache::{Cache, MemoryCache};
use money_scheduler::config::{CacheBackend, SchedulerConfig, StoreBackend};
use money_scheduler::errors::AppError;
use money_scheduler::external::quote_provider::{QuoteProvider, QuoteProviderError};
use money_scheduler::jobs;
use money_scheduler::models::{CreateJob, JobDefinition, JobExecutionLog, Priority, StockQuote};
use money_scheduler::node::{Backends, SchedulerNode};
use money_scheduler::services::handlers::{HandlerRegistry, JobResult};
use money_scheduler::services::notification::LogNotifier;
use money_scheduler::store::{JobStore, MemoryJobStore, MemoryStockStore};

pub const COUNT_TARGET: &str = "test.count";
pub const FAIL_TARGET: &str = "test.fail";
pub const PANIC_TARGET: &str = "test.panic";
/// Counts on entry, then holds its worker for `SLOW_RUN`.
pub const SLOW_TARGET: &str = "test.slow";
pub const SLOW_RUN: Duration = Duration::from_millis(400);

pub struct FixedQuotes {
    pub calls: AtomicUsize,
    pub quote: StockQuote,
}

#[async_trait]
impl QuoteProvider for FixedQuotes {
    async fn fetch_realtime(&self, _api_url: &str) -> Result<StockQuote, QuoteProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.quote.clone())
    }
}

/// Backends shared by every node of one simulated cluster.
pub struct Cluster {
    pub job_store: Arc<MemoryJobStore>,
    pub stock_store: Arc<MemoryStockStore>,
    pub cache: Arc<dyn Cache>,
    pub quotes: Arc<FixedQuotes>,
    pub invocations: Arc<AtomicUsize>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            job_store: Arc::new(MemoryJobStore::new()),
            stock_store: Arc::new(MemoryStockStore::new()),
            cache: Arc::new(MemoryCache::new()),
            quotes: Arc::new(FixedQuotes {
                calls: AtomicUsize::new(0),
                quote: StockQuote {
                    stock_code: "600519".into(),
                    company_name: "Kweichow Moutai".into(),
                    price: Some(1700.0),
                    low_price: Some(1650.0),
                    ..StockQuote::default()
                },
            }),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(node_id: &str) -> SchedulerConfig {
        SchedulerConfig {
            node_id: node_id.to_string(),
            store_backend: StoreBackend::Memory,
            cache_backend: CacheBackend::Memory,
            worker_pool_size: 4,
            ..SchedulerConfig::default()
        }
    }

    fn handlers(&self) -> HandlerRegistry {
        let mut handlers = HandlerRegistry::new();
        jobs::register_builtin(&mut handlers);

        let counter = self.invocations.clone();
        handlers.register_fn(COUNT_TARGET, move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(JobResult {
                    items_processed: 1,
                    items_failed: 0,
                })
            }
        });
        let counter = self.invocations.clone();
        handlers.register_fn(SLOW_TARGET, move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(SLOW_RUN).await;
                Ok::<_, AppError>(JobResult {
                    items_processed: 1,
                    items_failed: 0,
                })
            }
        });
        handlers.register_fn(FAIL_TARGET, |_ctx| async {
            Err::<JobResult, _>(AppError::Handler("quote service unreachable".into()))
        });
        handlers.register_fn(PANIC_TARGET, |_ctx| async {
            if true {
                panic!("boom");
            }
            Ok::<_, AppError>(JobResult::default())
        });
        handlers
    }

    pub async fn node(&self, node_id: &str) -> SchedulerNode {
        self.node_with(Self::config(node_id)).await
    }

    pub async fn node_with(&self, config: SchedulerConfig) -> SchedulerNode {
        let backends = Backends {
            job_store: self.job_store.clone(),
            stock_store: self.stock_store.clone(),
            cache: self.cache.clone(),
            quotes: self.quotes.clone(),
            notifier: Arc::new(LogNotifier),
        };
        SchedulerNode::build(config, backends, self.handlers())
            .await
            .expect("node builds")
    }

    pub async fn create_job(&self, name: &str, target: &str) -> JobDefinition {
        self.job_store
            .create_job(&CreateJob {
                name: name.to_string(),
                group_name: Some("test".to_string()),
                invoke_target: target.to_string(),
                cron_expression: None,
                enabled: true,
                concurrent: false,
                master_only: false,
                auto_replenish: false,
                priority: Priority::Normal,
            })
            .await
            .expect("job created")
    }

    pub fn logs_for(&self, job_id: i64) -> Vec<JobExecutionLog> {
        self.job_store
            .execution_logs()
            .into_iter()
            .filter(|l| l.job_id == job_id)
            .collect()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Poll until `check` holds or a second passes.
    pub async fn wait_for(&self, check: impl Fn(&Cluster) -> bool) -> bool {
        for _ in 0..100 {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }
}

/// Handle one message for `node` on a background task.
pub fn poll_in_background(node: &SchedulerNode) -> tokio::task::JoinHandle<bool> {
    let queue = node.queue.clone();
    let executor = node.executor.clone();
    tokio::spawn(async move {
        queue
            .poll_once(executor.as_ref())
            .await
            .expect("queue poll")
    })
}

/// Deliver everything queued for `node`, handling each message inline.
pub async fn drain(node: &SchedulerNode) -> usize {
    let mut handled = 0;
    while node
        .queue
        .poll_once(node.executor.as_ref())
        .await
        .expect("queue poll")
    {
        handled += 1;
    }
    handled
}
