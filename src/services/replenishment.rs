use crate::errors::AppError;
use crate::services::distributor::Distributor;
use crate::services::message_queue::MessageQueue;
use crate::services::node_registry::NodeRegistry;
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Master-only loop that puts opted-in jobs back on the queue when they go missing.
pub struct ReplenishmentService {
    store: Arc<dyn JobStore>,
    queue: Arc<MessageQueue>,
    distributor: Arc<Distributor>,
    nodes: Arc<NodeRegistry>,
}

impl ReplenishmentService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<MessageQueue>,
        distributor: Arc<Distributor>,
        nodes: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            store,
            queue,
            distributor,
            nodes,
        }
    }

    /// One cycle. Returns how many jobs were resubmitted.
    pub async fn run_once(&self) -> Result<usize, AppError> {
        if !self.nodes.is_master().await? {
            debug!("[REPLENISH] {} is not master, skipping", self.nodes.node_id());
            return Ok(0);
        }

        let mut resubmitted = 0;
        for job in self.store.list_enabled_jobs().await? {
            if !job.auto_replenish {
                continue;
            }
            let task_id = job.task_id();
            if self.queue.is_pending(&task_id).await? || self.queue.is_message_processing(&task_id).await? {
                continue;
            }

            match self.distributor.submit_untracked(job.to_payload()).await? {
                Some(execution_id) => {
                    info!(
                        "🔄 [REPLENISH] task={} missing from queue, resubmitted as {}",
                        task_id, execution_id
                    );
                    resubmitted += 1;
                }
                None => debug!("[REPLENISH] task={} became pending concurrently", task_id),
            }
        }
        Ok(resubmitted)
    }

    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("[REPLENISH] cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
