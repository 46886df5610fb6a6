use crate::cache::Cache;
use crate::config::SchedulerConfig;
use crate::errors::AppError;
use crate::external::quote_provider::QuoteProvider;
use crate::services::distributor::Distributor;
use crate::services::executor::JobExecutor;
use crate::services::handlers::{HandlerRegistry, JobDeps};
use crate::services::management::ManagementService;
use crate::services::message_queue::MessageQueue;
use crate::services::monitoring::MonitoringService;
use crate::services::node_registry::NodeRegistry;
use crate::services::notification::NotificationSink;
use crate::services::recovery::RecoveryService;
use crate::services::replenishment::ReplenishmentService;
use crate::services::scheduler::JobScheduler;
use crate::services::stock_refresh::StockRefreshWorker;
use crate::services::trigger::CronTrigger;
use crate::services::worker_pool::WorkerPool;
use crate::state::AppState;
use crate::store::{JobStore, StockStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External collaborators a node is built on.
#[derive(Clone)]
pub struct Backends {
    pub job_store: Arc<dyn JobStore>,
    pub stock_store: Arc<dyn StockStore>,
    pub cache: Arc<dyn Cache>,
    pub quotes: Arc<dyn QuoteProvider>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// One scheduler process: every service wired together, plus its background loops.
pub struct SchedulerNode {
    pub config: SchedulerConfig,
    pub pool: Arc<WorkerPool>,
    pub registry: Arc<NodeRegistry>,
    pub queue: Arc<MessageQueue>,
    pub distributor: Arc<Distributor>,
    pub scheduler: Arc<JobScheduler>,
    pub executor: Arc<JobExecutor>,
    pub monitoring: Arc<MonitoringService>,
    pub replenishment: Arc<ReplenishmentService>,
    pub recovery: Arc<RecoveryService>,
    pub trigger: Arc<CronTrigger>,
    pub management: Arc<ManagementService>,
    pub stock_worker: Arc<StockRefreshWorker>,
}

impl SchedulerNode {
    pub async fn build(
        config: SchedulerConfig,
        backends: Backends,
        handlers: HandlerRegistry,
    ) -> Result<Self, AppError> {
        let node_id = config.node_id.clone();
        let Backends {
            job_store,
            stock_store,
            cache,
            quotes,
            notifier,
        } = backends;

        let pool = Arc::new(WorkerPool::new(config.worker_pool_size));
        let registry = Arc::new(NodeRegistry::new(
            &node_id,
            cache.clone(),
            pool.clone(),
            config.node_metrics_ttl,
            config.master_lease,
        ));
        let queue = Arc::new(MessageQueue::new(
            &node_id,
            cache.clone(),
            config.max_retry,
            config.processing_timeout,
        ));
        let distributor = Arc::new(Distributor::new(
            registry.clone(),
            queue.clone(),
            pool.clone(),
            config.load_threshold,
        ));
        let scheduler = Arc::new(JobScheduler::new(
            job_store.clone(),
            cache.clone(),
            queue.clone(),
            distributor.clone(),
            config.ttls.clone(),
            config.max_retry,
        ));
        let monitoring = Arc::new(MonitoringService::new(
            cache.clone(),
            notifier.clone(),
            config.task_timeout,
            config.ttls.monitor_marker,
            config.ttls.alert_cooldown,
        ));
        let stock_worker = Arc::new(StockRefreshWorker::new(
            &node_id,
            cache.clone(),
            stock_store.clone(),
            quotes,
            notifier,
            config.stock.clone(),
        ));

        let handlers = Arc::new(handlers);
        let deps = JobDeps {
            job_store: job_store.clone(),
            stock_store,
            stock_worker: stock_worker.clone(),
            log_retention_days: config.log_retention_days,
            fan_out_concurrency: config.stock.fan_out_concurrency,
        };
        let executor = Arc::new(JobExecutor::new(
            &node_id,
            job_store.clone(),
            cache.clone(),
            config.lock_lease,
            config.ttls.dedup,
            monitoring.clone(),
            distributor.clone(),
            registry.clone(),
            handlers.clone(),
            deps,
            config.error_max_len,
        ));
        let replenishment = Arc::new(ReplenishmentService::new(
            job_store.clone(),
            queue.clone(),
            distributor.clone(),
            registry.clone(),
        ));
        let recovery = Arc::new(RecoveryService::new(
            &node_id,
            job_store.clone(),
            cache,
            queue.clone(),
            executor.clone(),
            pool.clone(),
            config.ttls.clone(),
        ));
        let trigger = Arc::new(CronTrigger::new(scheduler.clone(), job_store.clone()).await?);
        let management = Arc::new(ManagementService::new(
            job_store,
            scheduler.clone(),
            trigger.clone(),
            queue.clone(),
            registry.clone(),
            handlers,
        ));

        Ok(Self {
            config,
            pool,
            registry,
            queue,
            distributor,
            scheduler,
            executor,
            monitoring,
            replenishment,
            recovery,
            trigger,
            management,
            stock_worker,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            node_id: self.config.node_id.clone(),
            management: self.management.clone(),
            stock_worker: self.stock_worker.clone(),
        }
    }

    /// Join the cluster, recover what a previous run left behind, then start every loop.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<Vec<JoinHandle<()>>, AppError> {
        self.registry.register().await?;
        self.registry.try_elect().await?;
        self.recovery.startup().await?;
        self.trigger.start().await?;

        let intervals = &self.config.intervals;
        let handles = vec![
            self.registry
                .clone()
                .spawn_heartbeat(intervals.heartbeat, shutdown.clone()),
            self.registry
                .clone()
                .spawn_election(intervals.master_election, shutdown.clone()),
            self.queue.clone().start_listening(
                self.executor.clone(),
                self.pool.clone(),
                intervals.queue_poll,
                shutdown.clone(),
            ),
            self.queue
                .clone()
                .spawn_sweeper(intervals.processing_sweep, shutdown.clone()),
            self.monitoring
                .clone()
                .spawn(intervals.monitor_scan, shutdown.clone()),
            self.replenishment
                .clone()
                .spawn(intervals.replenishment, shutdown.clone()),
            self.recovery
                .clone()
                .spawn(intervals.recovery_scan, shutdown.clone()),
        ];

        info!("✅ Node {} started {} background loops", self.node_id(), handles.len());
        Ok(handles)
    }

    /// Stop after `shutdown` has been cancelled: drain loops and the pool, then leave.
    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) {
        if let Err(e) = self.trigger.shutdown().await {
            warn!("⚠️  {}", e);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("⚠️  Background loop ended abnormally: {}", e);
            }
        }
        self.pool.shutdown(self.config.shutdown_grace).await;
        if let Err(e) = self.registry.deregister().await {
            warn!("⚠️  Deregistration failed: {}", e);
        }
        info!("👋 Node {} stopped", self.node_id());
    }
}
