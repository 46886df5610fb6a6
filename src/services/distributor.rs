use crate::errors::AppError;
use crate::models::{JobPayload, TaskMessage};
use crate::services::message_queue::MessageQueue;
use crate::services::node_registry::NodeRegistry;
use crate::services::worker_pool::WorkerPool;
use std::sync::Arc;
use tracing::{debug, info};

// Random tie-breaker added to pool usage so equally loaded nodes share work.
const SCORE_JITTER: f64 = 0.05;

/// Chooses where a task runs, based on the load every node publishes.
pub struct Distributor {
    registry: Arc<NodeRegistry>,
    queue: Arc<MessageQueue>,
    pool: Arc<WorkerPool>,
    load_threshold: f64,
}

impl Distributor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        queue: Arc<MessageQueue>,
        pool: Arc<WorkerPool>,
        load_threshold: f64,
    ) -> Self {
        Self {
            registry,
            queue,
            pool,
            load_threshold,
        }
    }

    pub fn load_threshold(&self) -> f64 {
        self.load_threshold
    }

    /// Whether this node has headroom for `task_id` under `threshold`.
    pub fn should_execute_locally(&self, task_id: &str, threshold: f64) -> bool {
        let load = self.pool.load_factor();
        let local = load < threshold;
        if !local {
            debug!("[DIST_SHED] {} load {:.2} >= {:.2}", task_id, load, threshold);
        }
        local
    }

    /// Least loaded alive node under the threshold, or `None` for the any-node pool.
    pub async fn select_target_node(&self, exclude_self: bool) -> Result<Option<String>, AppError> {
        let mut best: Option<(String, f64)> = None;

        for node in self.registry.alive_nodes().await? {
            if exclude_self && node == self.registry.node_id() {
                continue;
            }
            let Some(metrics) = self.registry.node_metrics(&node).await? else {
                continue;
            };
            if metrics.pool_usage >= self.load_threshold {
                continue;
            }
            let score = metrics.pool_usage + rand::random::<f64>() * SCORE_JITTER;
            if best.as_ref().map_or(true, |(_, s)| score < *s) {
                best = Some((node, score));
            }
        }

        Ok(best.map(|(node, _)| node))
    }

    /// Publish `message` to a selected node. Used when shedding load.
    pub async fn distribute_task(&self, message: TaskMessage, exclude_self: bool) -> Result<bool, AppError> {
        let target = self.select_target_node(exclude_self).await?;
        self.relay_to(message, target).await
    }

    /// Republish `message` to `target` (`None` for the any-node pool).
    pub async fn relay_to(&self, mut message: TaskMessage, target: Option<String>) -> Result<bool, AppError> {
        message.target_node = target;
        message.enqueued_at = chrono::Utc::now();
        info!(
            "🔀 [DIST_RELAY] task={} execution={} -> {}",
            message.task_id,
            message.execution_id,
            message.target_node.as_deref().unwrap_or("any")
        );
        self.queue.enqueue_now(&message).await
    }

    /// Submit an execution with no runtime row behind it (replenishment).
    pub async fn submit_untracked(&self, job: JobPayload) -> Result<Option<String>, AppError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut message = TaskMessage::new(job, &execution_id, false);
        message.target_node = self.select_target_node(false).await?;
        if self.queue.enqueue_now(&message).await? {
            Ok(Some(execution_id))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, Cache, MemoryCache};
    use crate::models::{NodeMetrics, Priority};
    use chrono::Utc;
    use std::time::Duration;

    async fn publish(cache: &Arc<dyn Cache>, node: &str, usage: f64) {
        let metrics = NodeMetrics {
            node_id: node.into(),
            pool_usage: usage,
            pool_capacity: 8,
            queue_depth: 0,
            timestamp: Utc::now(),
        };
        cache.sadd(keys::NODES, node).await.unwrap();
        cache
            .set_ex(
                &keys::node_metrics(node),
                &serde_json::to_string(&metrics).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
    }

    fn distributor(cache: Arc<dyn Cache>) -> Distributor {
        let pool = Arc::new(WorkerPool::new(4));
        let registry = Arc::new(NodeRegistry::new(
            "node-a",
            cache.clone(),
            pool.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let queue = Arc::new(MessageQueue::new("node-a", cache, 3, Duration::from_secs(300)));
        Distributor::new(registry, queue, pool, 0.8)
    }

    #[tokio::test]
    async fn test_picks_least_loaded_node() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        publish(&cache, "node-a", 0.5).await;
        publish(&cache, "node-b", 0.1).await;
        publish(&cache, "node-c", 0.95).await;

        let d = distributor(cache);
        assert_eq!(d.select_target_node(false).await.unwrap().as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn test_overloaded_cluster_falls_back_to_any_pool() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        publish(&cache, "node-a", 0.1).await;
        publish(&cache, "node-b", 0.9).await;

        let d = distributor(cache.clone());
        assert_eq!(d.select_target_node(true).await.unwrap(), None);

        let job = JobPayload {
            job_id: 3,
            name: "x".into(),
            group_name: "g".into(),
            invoke_target: "noop".into(),
            concurrent: false,
            master_only: false,
            priority: Priority::Normal,
            trace_id: None,
        };
        let message = TaskMessage::new(job, "e1", true);
        assert!(d.distribute_task(message, true).await.unwrap());
        assert_eq!(cache.llen(&keys::queue(None, Priority::Normal)).await.unwrap(), 1);
    }

    #[test]
    fn test_idle_pool_executes_locally() {
        let d = distributor(Arc::new(MemoryCache::new()));
        assert!(d.should_execute_locally("g.x", 0.8));
        assert!(!d.should_execute_locally("g.x", 0.0));
    }
}
