use crate::cache::Cache;
use crate::errors::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cross-node mutual exclusion on a cache key, with lease renewal while held.
pub struct DistributedLock {
    cache: Arc<dyn Cache>,
    lease: Duration,
}

impl DistributedLock {
    pub fn new(cache: Arc<dyn Cache>, lease: Duration) -> Self {
        Self { cache, lease }
    }

    /// Zero-wait acquisition. `None` when another owner holds the key.
    pub async fn try_acquire(&self, key: &str, owner: &str) -> Result<Option<LockGuard>, AppError> {
        if !self.cache.set_nx_ex(key, owner, self.lease).await? {
            debug!("[LOCK_BUSY] {} held by another owner", key);
            return Ok(None);
        }

        let watchdog = CancellationToken::new();
        spawn_watchdog(
            self.cache.clone(),
            key.to_string(),
            owner.to_string(),
            self.lease,
            watchdog.clone(),
        );

        Ok(Some(LockGuard {
            cache: self.cache.clone(),
            key: key.to_string(),
            owner: owner.to_string(),
            watchdog,
            released: AtomicBool::new(false),
        }))
    }
}

fn spawn_watchdog(
    cache: Arc<dyn Cache>,
    key: String,
    owner: String,
    lease: Duration,
    stop: CancellationToken,
) {
    let every = (lease / 3).max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    match cache.compare_and_expire(&key, &owner, lease).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("[LOCK_LOST] {} no longer held by {}", key, owner);
                            break;
                        }
                        Err(e) => warn!("[LOCK_RENEW] {} renewal failed: {}", key, e),
                    }
                }
            }
        }
    });
}

/// Held lock. Release explicitly; dropping an unreleased guard releases in the background.
pub struct LockGuard {
    cache: Arc<dyn Cache>,
    key: String,
    owner: String,
    watchdog: CancellationToken,
    released: AtomicBool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(&self) -> Result<bool, AppError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.watchdog.cancel();
        self.cache.compare_and_delete(&self.key, &self.owner).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        self.watchdog.cancel();
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = cache.compare_and_delete(&key, &owner).await {
                    warn!("[LOCK_RELEASE] {} release on drop failed: {}", key, e);
                }
            });
        }
    }
}
