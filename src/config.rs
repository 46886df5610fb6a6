use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

fn millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(key, default))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// TTLs of the ephemeral cache keys.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    /// `dedup:{jobId}`, roughly the expected max runtime of a job.
    pub dedup: Duration,
    /// Dedup lock recreated by the lost-task scan.
    pub recovery_dedup: Duration,
    /// `runtime:{executionId}` snapshot.
    pub runtime_snapshot: Duration,
    /// `monitor:{taskId}` marker.
    pub monitor_marker: Duration,
    /// `alert-cooldown:{taskId}`.
    pub alert_cooldown: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            dedup: Duration::from_secs(3600),
            recovery_dedup: Duration::from_secs(7200),
            runtime_snapshot: Duration::from_secs(3600),
            monitor_marker: Duration::from_secs(3600),
            alert_cooldown: Duration::from_secs(1800),
        }
    }
}

/// Periods of the background loops.
#[derive(Debug, Clone)]
pub struct LoopIntervals {
    pub heartbeat: Duration,
    pub master_election: Duration,
    pub monitor_scan: Duration,
    pub replenishment: Duration,
    pub recovery_scan: Duration,
    pub processing_sweep: Duration,
    pub queue_poll: Duration,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            master_election: Duration::from_secs(30),
            monitor_scan: Duration::from_secs(300),
            replenishment: Duration::from_secs(60),
            recovery_scan: Duration::from_secs(30),
            processing_sweep: Duration::from_secs(60),
            queue_poll: Duration::from_millis(200),
        }
    }
}

/// Tuning for the per-entity stock refresh worker.
#[derive(Debug, Clone)]
pub struct StockWorkerConfig {
    pub fetch_attempts: u32,
    pub retry_base_delay: Duration,
    pub notify_cap: i32,
    pub idempotency_ttl: Duration,
    pub fan_out_concurrency: usize,
}

impl Default for StockWorkerConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(300),
            notify_cap: 3,
            idempotency_ttl: Duration::from_secs(6 * 3600),
            fan_out_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub node_id: String,
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub cache_backend: CacheBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub quote_service_url: String,
    pub ttls: CacheTtls,
    pub intervals: LoopIntervals,
    pub stock: StockWorkerConfig,
    /// Slots in the job worker pool.
    pub worker_pool_size: usize,
    /// Pool occupancy above which the executor sheds load to another node.
    pub load_threshold: f64,
    pub lock_lease: Duration,
    pub master_lease: Duration,
    pub node_metrics_ttl: Duration,
    /// Elapsed time after which an outstanding task raises an alert.
    pub task_timeout: Duration,
    /// Age after which an unacknowledged message in a processing list is requeued.
    pub processing_timeout: Duration,
    pub max_retry: i32,
    pub error_max_len: usize,
    pub log_retention_days: i64,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            node_id: format!("node-{}", uuid::Uuid::new_v4().simple()),
            bind_addr: "0.0.0.0:3000".to_string(),
            store_backend: StoreBackend::Memory,
            cache_backend: CacheBackend::Memory,
            database_url: None,
            redis_url: None,
            quote_service_url: "http://127.0.0.1:8000".to_string(),
            ttls: CacheTtls::default(),
            intervals: LoopIntervals::default(),
            stock: StockWorkerConfig::default(),
            worker_pool_size: cores * 2,
            load_threshold: 0.8,
            lock_lease: Duration::from_secs(30),
            master_lease: Duration::from_secs(60),
            node_metrics_ttl: Duration::from_secs(300),
            task_timeout: Duration::from_secs(600),
            processing_timeout: Duration::from_secs(300),
            max_retry: 3,
            error_max_len: 2000,
            log_retention_days: 30,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let node_id = std::env::var("NODE_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or(defaults.node_id);

        let store_backend = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        let cache_backend = match std::env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => CacheBackend::Memory,
            _ => CacheBackend::Redis,
        };

        Self {
            node_id,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            store_backend,
            cache_backend,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            quote_service_url: std::env::var("QUOTE_SERVICE_URL").unwrap_or(defaults.quote_service_url),
            ttls: CacheTtls {
                dedup: secs("DEDUP_TTL_SECS", 3600),
                recovery_dedup: secs("RECOVERY_DEDUP_TTL_SECS", 7200),
                runtime_snapshot: secs("RUNTIME_CACHE_TTL_SECS", 3600),
                monitor_marker: secs("MONITOR_MARKER_TTL_SECS", 3600),
                alert_cooldown: secs("ALERT_COOLDOWN_SECS", 1800),
            },
            intervals: LoopIntervals {
                heartbeat: secs("HEARTBEAT_INTERVAL_SECS", 30),
                master_election: secs("MASTER_ELECTION_INTERVAL_SECS", 30),
                monitor_scan: secs("MONITOR_SCAN_INTERVAL_SECS", 300),
                replenishment: secs("REPLENISH_INTERVAL_SECS", 60),
                recovery_scan: secs("RECOVERY_SCAN_INTERVAL_SECS", 30),
                processing_sweep: secs("PROCESSING_SWEEP_INTERVAL_SECS", 60),
                queue_poll: millis("QUEUE_POLL_MS", 200),
            },
            stock: StockWorkerConfig {
                fetch_attempts: env_or("STOCK_FETCH_ATTEMPTS", 3),
                retry_base_delay: millis("STOCK_RETRY_BASE_MS", 300),
                notify_cap: env_or("STOCK_NOTIFY_CAP", 3),
                idempotency_ttl: secs("STOCK_IDEMPOTENCY_TTL_SECS", 6 * 3600),
                fan_out_concurrency: env_or("STOCK_FAN_OUT_CONCURRENCY", 4),
            },
            worker_pool_size: env_or("WORKER_POOL_SIZE", defaults.worker_pool_size),
            load_threshold: env_or("LOAD_THRESHOLD", 0.8),
            lock_lease: secs("LOCK_LEASE_SECS", 30),
            master_lease: secs("MASTER_LEASE_SECS", 60),
            node_metrics_ttl: secs("NODE_METRICS_TTL_SECS", 300),
            task_timeout: secs("TASK_TIMEOUT_SECS", 600),
            processing_timeout: secs("PROCESSING_TIMEOUT_SECS", 300),
            max_retry: env_or("MAX_RETRY", 3),
            error_max_len: env_or("ERROR_MAX_LEN", 2000),
            log_retention_days: env_or("LOG_RETENTION_DAYS", 30),
            shutdown_grace: secs("SHUTDOWN_GRACE_SECS", 10),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node_id.trim().is_empty() {
            return Err("NODE_ID must not be empty".to_string());
        }
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            return Err("STORE_BACKEND is postgres but DATABASE_URL is not set".to_string());
        }
        if self.cache_backend == CacheBackend::Redis && self.redis_url.is_none() {
            return Err("CACHE_BACKEND is redis but REDIS_URL is not set".to_string());
        }
        if !(0.0..=1.0).contains(&self.load_threshold) {
            return Err(format!("LOAD_THRESHOLD must be within [0, 1], got {}", self.load_threshold));
        }
        if self.worker_pool_size == 0 {
            return Err("WORKER_POOL_SIZE must be positive".to_string());
        }
        if self.lock_lease < Duration::from_secs(3) {
            return Err("LOCK_LEASE_SECS must be at least 3".to_string());
        }
        if self.stock.fetch_attempts == 0 {
            return Err("STOCK_FETCH_ATTEMPTS must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_for_memory_backends() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ttls.dedup, Duration::from_secs(3600));
        assert_eq!(config.ttls.alert_cooldown, Duration::from_secs(1800));
        assert_eq!(config.task_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let config = SchedulerConfig {
            store_backend: StoreBackend::Postgres,
            database_url: None,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = SchedulerConfig {
            load_threshold: 1.5,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
