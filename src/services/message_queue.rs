use crate::cache::{keys, Cache};
use crate::errors::AppError;
use crate::models::{Disposition, Priority, QueueStats, TaskMessage};
use crate::services::worker_pool::WorkerPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECENT_HISTORY: isize = 50;

/// Consumer callback registered with [`MessageQueue::start_listening`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: TaskMessage) -> Result<Disposition, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentCompletion {
    pub task_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub finished_at: DateTime<Utc>,
}

/// Per-node and any-node task lists on Redis with PENDING/EXECUTING tracking.
///
/// Delivery moves a message into this node's processing list; it leaves that list
/// only through `ack` or `requeue`, so a crash between the two is recovered by the
/// processing sweep.
pub struct MessageQueue {
    node_id: String,
    cache: Arc<dyn Cache>,
    // task_id -> execution_id of messages delivered here and not yet acknowledged
    processing: DashMap<String, String>,
    // claim and sweep must not interleave on the processing list
    claim_lock: Mutex<()>,
    max_retry: i32,
    processing_timeout: Duration,
}

impl MessageQueue {
    pub fn new(
        node_id: &str,
        cache: Arc<dyn Cache>,
        max_retry: i32,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            cache,
            processing: DashMap::new(),
            claim_lock: Mutex::new(()),
            max_retry,
            processing_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish to the message's target node (or the any-node pool) at its priority.
    /// Returns false when the task is already pending.
    pub async fn enqueue_now(&self, message: &TaskMessage) -> Result<bool, AppError> {
        let list = keys::queue(message.target_node.as_deref(), message.priority);
        let payload = message.encode()?;
        let pushed = self
            .cache
            .enqueue_unique(keys::PENDING, &list, &message.task_id, &payload)
            .await?;

        if pushed {
            info!(
                "📨 [QUEUE_ENQUEUE] task={} execution={} list={}",
                message.task_id, message.execution_id, list
            );
        } else {
            info!(
                "[QUEUE_SKIP_PENDING] task={} already pending, execution={} not enqueued",
                message.task_id, message.execution_id
            );
        }
        Ok(pushed)
    }

    fn drain_order(&self) -> [String; 4] {
        [
            keys::queue(Some(&self.node_id), Priority::High),
            keys::queue(None, Priority::High),
            keys::queue(Some(&self.node_id), Priority::Normal),
            keys::queue(None, Priority::Normal),
        ]
    }

    /// Move the next message into the processing list and mark it EXECUTING.
    ///
    /// A message whose task is already EXECUTING somewhere is acknowledged without
    /// being handed out.
    pub async fn claim_next(&self) -> Result<Option<TaskMessage>, AppError> {
        let _guard = self.claim_lock.lock().await;
        let processing_key = keys::processing(&self.node_id);

        for source in self.drain_order() {
            while let Some(raw) = self.cache.rpoplpush(&source, &processing_key).await? {
                let message = match TaskMessage::decode(&raw) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("[QUEUE_POISON] dropping undecodable message from {}: {}", source, e);
                        self.cache.lrem(&processing_key, &raw).await?;
                        continue;
                    }
                };

                self.cache.srem(keys::PENDING, &message.task_id).await?;
                if !self.cache.sadd(keys::EXECUTING, &message.task_id).await? {
                    warn!(
                        "[QUEUE_DUPLICATE] task={} already executing, execution={} acknowledged without running",
                        message.task_id, message.execution_id
                    );
                    self.cache.lrem(&processing_key, &raw).await?;
                    continue;
                }

                self.processing
                    .insert(message.task_id.clone(), message.execution_id.clone());
                debug!(
                    "[QUEUE_CLAIM] task={} execution={} from {}",
                    message.task_id, message.execution_id, source
                );
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Remove a handled message from the processing list.
    pub async fn ack(&self, message: &TaskMessage, record_history: bool) -> Result<(), AppError> {
        self.processing.remove(&message.task_id);
        if let Some(raw) = &message.raw {
            self.cache.lrem(&keys::processing(&self.node_id), raw).await?;
        }
        if record_history {
            let entry = RecentCompletion {
                task_id: message.task_id.clone(),
                execution_id: message.execution_id.clone(),
                node_id: self.node_id.clone(),
                finished_at: Utc::now(),
            };
            self.cache.lpush(keys::RECENT, &serde_json::to_string(&entry)?).await?;
            self.cache.ltrim(keys::RECENT, 0, RECENT_HISTORY - 1).await?;
        }
        Ok(())
    }

    /// Put a message back on its list after an infrastructure failure.
    /// Returns false once the retry budget is spent and the message is dropped.
    pub async fn requeue(&self, mut message: TaskMessage) -> Result<bool, AppError> {
        self.processing.remove(&message.task_id);
        if let Some(raw) = message.raw.take() {
            self.cache.lrem(&keys::processing(&self.node_id), &raw).await?;
        }
        self.cache.srem(keys::EXECUTING, &message.task_id).await?;

        message.retry_count += 1;
        if message.retry_count > self.max_retry {
            error!(
                "❌ [QUEUE_DROP] task={} execution={} exceeded {} retries",
                message.task_id, message.execution_id, self.max_retry
            );
            return Ok(false);
        }

        message.enqueued_at = Utc::now();
        warn!(
            "🔁 [QUEUE_REQUEUE] task={} execution={} attempt {}",
            message.task_id, message.execution_id, message.retry_count
        );
        self.enqueue_now(&message).await
    }

    /// Requeue messages stranded in this node's processing list.
    ///
    /// With `force` every message not currently handled here is requeued (startup);
    /// otherwise only those older than the processing timeout.
    pub async fn sweep_processing(&self, force: bool) -> Result<usize, AppError> {
        let _guard = self.claim_lock.lock().await;
        let processing_key = keys::processing(&self.node_id);
        let timeout = chrono::Duration::from_std(self.processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = Utc::now();
        let mut requeued = 0;

        for raw in self.cache.lrange(&processing_key, 0, -1).await? {
            let message = match TaskMessage::decode(&raw) {
                Ok(message) => message,
                Err(_) => {
                    self.cache.lrem(&processing_key, &raw).await?;
                    continue;
                }
            };

            let handled_here = self
                .processing
                .get(&message.task_id)
                .is_some_and(|execution| *execution == message.execution_id);
            if handled_here || (!force && now - message.enqueued_at < timeout) {
                continue;
            }

            warn!(
                "[QUEUE_SWEEP] stranded task={} execution={} enqueued at {}",
                message.task_id, message.execution_id, message.enqueued_at
            );
            if self.requeue(message).await? {
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    pub async fn is_message_processing(&self, task_id: &str) -> Result<bool, AppError> {
        if self.processing.contains_key(task_id) {
            return Ok(true);
        }
        self.cache.sismember(keys::EXECUTING, task_id).await
    }

    pub async fn is_pending(&self, task_id: &str) -> Result<bool, AppError> {
        self.cache.sismember(keys::PENDING, task_id).await
    }

    pub async fn stats(&self) -> Result<QueueStats, AppError> {
        let mut local = 0;
        for priority in [Priority::High, Priority::Normal] {
            local += self.cache.llen(&keys::queue(Some(&self.node_id), priority)).await?;
        }
        Ok(QueueStats {
            pending: self.cache.scard(keys::PENDING).await?,
            executing: self.cache.scard(keys::EXECUTING).await?,
            local_queue_length: local,
        })
    }

    pub async fn recent_completions(&self) -> Result<Vec<RecentCompletion>, AppError> {
        let raw = self.cache.lrange(keys::RECENT, 0, RECENT_HISTORY - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    /// Hand a claimed message to the handler and settle it with the queue.
    pub async fn dispatch(&self, handler: &dyn MessageHandler, message: TaskMessage) {
        let settled = match handler.handle(message.clone()).await {
            Ok(Disposition::Done) => self.ack(&message, true).await,
            Ok(Disposition::Relayed) => self.ack(&message, false).await,
            Err(e) => {
                error!(
                    "[QUEUE_HANDLER_ERROR] task={} execution={}: {}",
                    message.task_id, message.execution_id, e
                );
                self.requeue(message.clone()).await.map(|_| ())
            }
        };
        if let Err(e) = settled {
            error!(
                "[QUEUE_SETTLE] task={} execution={} could not be settled: {}",
                message.task_id, message.execution_id, e
            );
        }
    }

    /// Claim and handle a single message inline. Returns whether one was found.
    pub async fn poll_once(&self, handler: &dyn MessageHandler) -> Result<bool, AppError> {
        match self.claim_next().await? {
            Some(message) => {
                self.dispatch(handler, message).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Consume this node's lists, running each message on the worker pool.
    pub fn start_listening(
        self: Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        pool: Arc<WorkerPool>,
        poll: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        info!("👂 [QUEUE_LISTEN] node {} consuming task lists", self.node_id);
        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let claimed = if pool.has_capacity() {
                    self.claim_next().await
                } else {
                    Ok(None)
                };

                match claimed {
                    Ok(Some(message)) => {
                        let queue = self.clone();
                        let handler = handler.clone();
                        let label = message.task_id.clone();
                        pool.submit(&label, async move {
                            queue.dispatch(handler.as_ref(), message).await;
                        });
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => error!("[QUEUE_LISTEN] claim failed: {}", e),
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            info!("👂 [QUEUE_LISTEN] node {} stopped consuming", self.node_id);
        })
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.sweep_processing(false).await {
                            Ok(0) => {}
                            Ok(n) => info!("[QUEUE_SWEEP] requeued {} stranded messages", n),
                            Err(e) => error!("[QUEUE_SWEEP] failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
