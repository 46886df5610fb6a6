use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Bounded pool that job bodies run on.
///
/// Submissions never block the caller: they are spawned immediately and wait for a
/// permit. `queued + active` is what the distributor and the queue listener treat as
/// local load.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    tracker: TaskTracker,
}

// Decrements a counter when dropped, including during unwinding.
struct CountGuard(Arc<AtomicUsize>);

impl CountGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn submit<F>(&self, label: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let queued_guard = CountGuard::enter(&self.queued);
        let label = label.to_string();

        self.tracker.spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Worker pool closed, dropping task {}", label);
                    return;
                }
            };
            drop(queued_guard);
            let _active = CountGuard::enter(&active);
            debug!("Worker slot taken for {}", label);
            task.await;
            drop(permit);
        });
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn has_capacity(&self) -> bool {
        self.active() + self.queued() < self.capacity
    }

    /// Occupancy in `[0, ..)`; above 1.0 when work is waiting for a slot.
    pub fn load_factor(&self) -> f64 {
        (self.active() + self.queued()) as f64 / self.capacity as f64
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !finished {
            warn!(
                "⚠️  Worker pool still had {} active tasks after {:?}",
                self.active(),
                grace
            );
        }
        finished
    }
}
