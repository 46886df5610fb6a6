use crate::cache::{keys, Cache};
use crate::errors::AppError;
use crate::services::notification::NotificationSink;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Flags tasks that have been outstanding too long. Detection only.
pub struct MonitoringService {
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn NotificationSink>,
    task_timeout: Duration,
    marker_ttl: Duration,
    alert_cooldown: Duration,
}

impl MonitoringService {
    pub fn new(
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn NotificationSink>,
        task_timeout: Duration,
        marker_ttl: Duration,
        alert_cooldown: Duration,
    ) -> Self {
        Self {
            cache,
            notifier,
            task_timeout,
            marker_ttl,
            alert_cooldown,
        }
    }

    pub async fn record_task_start(&self, task_id: &str) -> Result<(), AppError> {
        let started = Utc::now().timestamp_millis().to_string();
        self.cache
            .set_ex(&keys::monitor(task_id), &started, self.marker_ttl)
            .await
    }

    pub async fn record_task_complete(&self, task_id: &str) -> Result<(), AppError> {
        self.cache.delete(&keys::monitor(task_id)).await?;
        Ok(())
    }

    /// One pass over the outstanding markers. Returns the number of alerts raised.
    pub async fn scan_once(&self) -> Result<usize, AppError> {
        let now = Utc::now().timestamp_millis();
        let timeout_ms = self.task_timeout.as_millis() as i64;
        let mut alerts = 0;

        for key in self.cache.keys_with_prefix(keys::MONITOR_PREFIX).await? {
            let Some(task_id) = key.strip_prefix(keys::MONITOR_PREFIX) else {
                continue;
            };
            let Some(started) = self.cache.get(&key).await? else {
                continue;
            };
            let Ok(started) = started.parse::<i64>() else {
                debug!("[MONITOR] ignoring malformed marker {}", key);
                continue;
            };

            let elapsed = now - started;
            if elapsed <= timeout_ms {
                continue;
            }

            // Cooldown key doubles as the "already alerted" check.
            if !self
                .cache
                .set_nx_ex(&keys::alert_cooldown(task_id), "1", self.alert_cooldown)
                .await?
            {
                continue;
            }

            warn!(
                "⏰ [MONITOR_TIMEOUT] task={} outstanding for {}s",
                task_id,
                elapsed / 1000
            );
            let subject = format!("Task timeout: {}", task_id);
            let message = format!(
                "Task {} has been running for {} seconds (threshold {} seconds).",
                task_id,
                elapsed / 1000,
                self.task_timeout.as_secs()
            );
            if let Err(e) = self.notifier.notify(&subject, &message).await {
                error!("[MONITOR_ALERT] task={} alert not delivered: {}", task_id, e);
            }
            alerts += 1;
        }
        Ok(alerts)
    }

    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.scan_once().await {
                            error!("[MONITOR] scan failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
