use crate::cache::{keys, Cache};
use crate::errors::AppError;
use crate::models::{ClusterView, NodeMetrics, Priority};
use crate::services::worker_pool::WorkerPool;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cluster membership, load metrics and master election over the shared cache.
pub struct NodeRegistry {
    node_id: String,
    cache: Arc<dyn Cache>,
    pool: Arc<WorkerPool>,
    metrics_ttl: Duration,
    master_lease: Duration,
}

impl NodeRegistry {
    pub fn new(
        node_id: &str,
        cache: Arc<dyn Cache>,
        pool: Arc<WorkerPool>,
        metrics_ttl: Duration,
        master_lease: Duration,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            cache,
            pool,
            metrics_ttl,
            master_lease,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn register(&self) -> Result<(), AppError> {
        self.heartbeat().await?;
        info!("🖥️  [NODE_REGISTER] node {} joined the cluster", self.node_id);
        Ok(())
    }

    /// Publish this node's load and refresh its membership.
    pub async fn heartbeat(&self) -> Result<(), AppError> {
        let mut queue_depth = 0u64;
        for priority in [Priority::High, Priority::Normal] {
            queue_depth += self.cache.llen(&keys::queue(Some(&self.node_id), priority)).await?;
        }

        let metrics = NodeMetrics {
            node_id: self.node_id.clone(),
            pool_usage: self.pool.load_factor(),
            pool_capacity: self.pool.capacity(),
            queue_depth: queue_depth as usize,
            timestamp: Utc::now(),
        };

        let payload = serde_json::to_string(&metrics)?;
        self.cache.sadd(keys::NODES, &self.node_id).await?;
        self.cache
            .set_ex(&keys::node_metrics(&self.node_id), &payload, self.metrics_ttl)
            .await?;
        debug!(
            "[NODE_HEARTBEAT] {} usage={:.2} queue={}",
            self.node_id, metrics.pool_usage, metrics.queue_depth
        );
        Ok(())
    }

    /// Take or renew the master lease. Returns whether this node holds it afterwards.
    pub async fn try_elect(&self) -> Result<bool, AppError> {
        if self
            .cache
            .set_nx_ex(keys::MASTER, &self.node_id, self.master_lease)
            .await?
        {
            info!("👑 [MASTER_ELECTED] node {} is now master", self.node_id);
            return Ok(true);
        }
        let renewed = self
            .cache
            .compare_and_expire(keys::MASTER, &self.node_id, self.master_lease)
            .await?;
        if renewed {
            debug!("[MASTER_RENEW] {} renewed master lease", self.node_id);
        }
        Ok(renewed)
    }

    /// Always reads the cache; the role can move between calls.
    pub async fn is_master(&self) -> Result<bool, AppError> {
        Ok(self.current_master().await?.as_deref() == Some(self.node_id.as_str()))
    }

    pub async fn current_master(&self) -> Result<Option<String>, AppError> {
        self.cache.get(keys::MASTER).await
    }

    /// Registered nodes whose metrics have not expired. Dead members are pruned.
    pub async fn alive_nodes(&self) -> Result<Vec<String>, AppError> {
        let mut alive = Vec::new();
        for node in self.cache.smembers(keys::NODES).await? {
            if self.cache.exists(&keys::node_metrics(&node)).await? {
                alive.push(node);
            } else {
                warn!("[NODE_EXPIRED] removing {} from the registry", node);
                self.cache.srem(keys::NODES, &node).await?;
            }
        }
        alive.sort();
        Ok(alive)
    }

    pub async fn node_metrics(&self, node_id: &str) -> Result<Option<NodeMetrics>, AppError> {
        match self.cache.get(&keys::node_metrics(node_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn cluster_view(&self) -> Result<ClusterView, AppError> {
        Ok(ClusterView {
            node_id: self.node_id.clone(),
            master: self.current_master().await?,
            alive_nodes: self.alive_nodes().await?,
        })
    }

    pub async fn deregister(&self) -> Result<(), AppError> {
        self.cache.srem(keys::NODES, &self.node_id).await?;
        self.cache.delete(&keys::node_metrics(&self.node_id)).await?;
        if self.cache.compare_and_delete(keys::MASTER, &self.node_id).await? {
            info!("👑 [MASTER_RESIGN] node {} released master lease", self.node_id);
        }
        info!("🖥️  [NODE_DEREGISTER] node {} left the cluster", self.node_id);
        Ok(())
    }

    pub fn spawn_heartbeat(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.heartbeat().await {
                            error!("[NODE_HEARTBEAT] failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub fn spawn_election(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.try_elect().await {
                            error!("[MASTER_ELECTION] failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
