use crate::cache::{keys, Cache};
use crate::config::StockWorkerConfig;
use crate::errors::{truncate_error, AppError};
use crate::external::quote_provider::QuoteProvider;
use crate::models::{NewStockRefreshRecord, StockQuote, StockRefreshTask, StockTaskState, StockTaskStatus};
use crate::services::notification::NotificationSink;
use crate::store::StockStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

const RESULT_MAX_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Same trace id and code seen within the guard window; nothing was touched.
    Duplicate,
    Completed(StockTaskState),
}

/// Refreshes one watch stock per call: quote fetch, dependent trades, threshold alert.
pub struct StockRefreshWorker {
    node_id: String,
    cache: Arc<dyn Cache>,
    store: Arc<dyn StockStore>,
    provider: Arc<dyn QuoteProvider>,
    notifier: Arc<dyn NotificationSink>,
    config: StockWorkerConfig,
}

struct Attempt {
    state: StockTaskState,
    result: String,
    stock_name: Option<String>,
}

impl Attempt {
    fn new(state: StockTaskState, result: impl Into<String>, stock_name: Option<String>) -> Self {
        Self {
            state,
            result: result.into(),
            stock_name,
        }
    }
}

impl StockRefreshWorker {
    pub fn new(
        node_id: &str,
        cache: Arc<dyn Cache>,
        store: Arc<dyn StockStore>,
        provider: Arc<dyn QuoteProvider>,
        notifier: Arc<dyn NotificationSink>,
        config: StockWorkerConfig,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            cache,
            store,
            provider,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn StockStore> {
        &self.store
    }

    pub async fn refresh(&self, task: &StockRefreshTask) -> Result<RefreshOutcome, AppError> {
        let guard = keys::stock_idempotency(&task.trace_id, &task.stock_code);
        if !self
            .cache
            .set_nx_ex(&guard, &self.node_id, self.config.idempotency_ttl)
            .await?
        {
            info!(
                "[STOCK_DUPLICATE] code={} trace={} already handled, skipping",
                task.stock_code, task.trace_id
            );
            return Ok(RefreshOutcome::Duplicate);
        }

        let attempt = match self.mark_started(task).await {
            Ok(()) => match self.process(&task.stock_code).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    error!("❌ [STOCK_ERROR] code={} trace={}: {}", task.stock_code, task.trace_id, e);
                    Attempt::new(StockTaskState::Failed, truncate_error(&e.to_string(), RESULT_MAX_LEN), None)
                }
            },
            Err(e) => {
                error!(
                    "❌ [STOCK_STATUS] code={} trace={} could not be marked running: {}",
                    task.stock_code, task.trace_id, e
                );
                // Nothing was touched, so a redelivery may try again.
                if let Err(e) = self.cache.delete(&guard).await {
                    warn!("[STOCK_STATUS] code={} idempotency guard kept: {}", task.stock_code, e);
                }
                Attempt::new(StockTaskState::Failed, truncate_error(&e.to_string(), RESULT_MAX_LEN), None)
            }
        };

        if let Err(e) = self
            .set_status(task, attempt.state, Some(attempt.result.clone()))
            .await
        {
            warn!("[STOCK_STATUS] code={} final status not written: {}", task.stock_code, e);
        }

        let record = NewStockRefreshRecord {
            stock_code: task.stock_code.clone(),
            stock_name: attempt.stock_name,
            status: attempt.state,
            execute_result: attempt.result,
            node_id: self.node_id.clone(),
            trace_id: task.trace_id.clone(),
        };
        if let Err(e) = self.store.insert_refresh_record(&record).await {
            error!("[STOCK_AUDIT] code={} record not written: {}", task.stock_code, e);
        }

        info!(
            "📈 [STOCK_DONE] code={} trace={} status={}",
            task.stock_code,
            task.trace_id,
            attempt.state.as_str()
        );
        Ok(RefreshOutcome::Completed(attempt.state))
    }

    async fn process(&self, code: &str) -> Result<Attempt, AppError> {
        let Some(mut stock) = self.store.get_watch_stock(code).await? else {
            return Ok(Attempt::new(StockTaskState::Skipped, "Stock not found", None));
        };
        let name = Some(stock.name.clone());

        let Some(api_url) = stock.api_url.clone().filter(|_| stock.has_valid_api()) else {
            warn!("[STOCK_SKIP] code={} has no usable api url", code);
            return Ok(Attempt::new(StockTaskState::Skipped, "INVALID_URL", name));
        };

        let Some(quote) = self.fetch_with_retry(code, &api_url).await else {
            return Ok(Attempt::new(
                StockTaskState::Failed,
                "Fetch returned null after retry",
                name,
            ));
        };

        stock.apply_quote(&quote);
        self.store.update_watch_stock(&stock).await?;

        if let Some(price) = stock.new_price {
            for mut trade in self.store.list_trades(code).await? {
                trade.reprice(price);
                self.store.update_trade(&trade).await?;
            }
        }

        if stock.below_threshold() && stock.notify_count < self.config.notify_cap {
            stock.notify_count += 1;
            self.store.update_watch_stock(&stock).await?;

            let subject = format!("Price alert: {} ({})", stock.name, stock.code);
            let message = format!(
                "{} low {:.2} is below threshold {:.2} (alert {}/{})",
                stock.code,
                stock.low_price.unwrap_or_default(),
                stock.threshold_price.unwrap_or_default(),
                stock.notify_count,
                self.config.notify_cap
            );
            if let Err(e) = self.notifier.notify(&subject, &message).await {
                warn!("[STOCK_NOTIFY] code={} alert failed: {}", code, e);
            }
        }

        let name = Some(stock.name.clone());
        Ok(match quote.price {
            Some(price) => Attempt::new(StockTaskState::Success, format!("Price={}", price), name),
            None => Attempt::new(StockTaskState::Failed, "Price= null", name),
        })
    }

    async fn fetch_with_retry(&self, code: &str, api_url: &str) -> Option<StockQuote> {
        let attempts = self.config.fetch_attempts.max(1);
        for attempt in 1..=attempts {
            match self.provider.fetch_realtime(api_url).await {
                Ok(quote) => return Some(quote),
                Err(e) => {
                    warn!("[STOCK_FETCH] code={} attempt {}/{} failed: {}", code, attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_base_delay * attempt).await;
                    }
                }
            }
        }
        None
    }

    async fn mark_started(&self, task: &StockRefreshTask) -> Result<(), AppError> {
        self.set_status(task, StockTaskState::Occupied, None).await?;
        self.set_status(task, StockTaskState::Running, None).await
    }

    async fn set_status(
        &self,
        task: &StockRefreshTask,
        state: StockTaskState,
        last_result: Option<String>,
    ) -> Result<(), AppError> {
        let status = StockTaskStatus {
            stock_code: task.stock_code.clone(),
            status: state,
            occupied_by_node: self.node_id.clone(),
            occupied_time: Utc::now(),
            trace_id: task.trace_id.clone(),
            last_result,
        };
        self.cache
            .hset_all(&keys::stock_status(&task.stock_code), &status.to_fields())
            .await
    }

    pub async fn status(&self, code: &str) -> Result<Option<StockTaskStatus>, AppError> {
        let fields = self.cache.hgetall(&keys::stock_status(code)).await?;
        Ok(StockTaskStatus::from_fields(&fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::external::quote_provider::QuoteProviderError;
    use crate::models::{StockTrade, WatchStock};
    use crate::store::MemoryStockStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Memory cache whose status hashes cannot be written.
    struct HashlessCache(MemoryCache);

    #[async_trait]
    impl Cache for HashlessCache {
        async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
            self.0.set_nx_ex(key, value, ttl).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
            self.0.set_ex(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
            self.0.get(key).await
        }
        async fn delete(&self, key: &str) -> Result<bool, AppError> {
            self.0.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, AppError> {
            self.0.exists(key).await
        }
        async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, AppError> {
            self.0.compare_and_delete(key, expected).await
        }
        async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, AppError> {
            self.0.compare_and_expire(key, expected, ttl).await
        }
        async fn sadd(&self, key: &str, member: &str) -> Result<bool, AppError> {
            self.0.sadd(key, member).await
        }
        async fn srem(&self, key: &str, member: &str) -> Result<bool, AppError> {
            self.0.srem(key, member).await
        }
        async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
            self.0.sismember(key, member).await
        }
        async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
            self.0.smembers(key).await
        }
        async fn scard(&self, key: &str) -> Result<u64, AppError> {
            self.0.scard(key).await
        }
        async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
            self.0.lpush(key, value).await
        }
        async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>, AppError> {
            self.0.rpoplpush(source, destination).await
        }
        async fn lrem(&self, key: &str, value: &str) -> Result<bool, AppError> {
            self.0.lrem(key, value).await
        }
        async fn llen(&self, key: &str) -> Result<u64, AppError> {
            self.0.llen(key).await
        }
        async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
            self.0.lrange(key, start, stop).await
        }
        async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), AppError> {
            self.0.ltrim(key, start, stop).await
        }
        async fn hset_all(&self, _key: &str, _fields: &[(String, String)]) -> Result<(), AppError> {
            Err(AppError::Cache("connection reset".into()))
        }
        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
            self.0.hgetall(key).await
        }
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
            self.0.keys_with_prefix(prefix).await
        }
        async fn enqueue_unique(&self, set: &str, list: &str, member: &str, payload: &str) -> Result<bool, AppError> {
            self.0.enqueue_unique(set, list, member, payload).await
        }
    }

    struct ScriptedProvider {
        calls: AtomicUsize,
        fail_first: usize,
        quote: StockQuote,
    }

    #[async_trait]
    impl QuoteProvider for ScriptedProvider {
        async fn fetch_realtime(&self, _api_url: &str) -> Result<StockQuote, QuoteProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(QuoteProviderError::Network("reset".into()));
            }
            Ok(self.quote.clone())
        }
    }

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for CapturingNotifier {
        async fn notify(&self, subject: &str, _message: &str) -> Result<(), AppError> {
            self.sent.lock().push(subject.to_string());
            Ok(())
        }
    }

    fn stock(code: &str, api: Option<&str>) -> WatchStock {
        WatchStock {
            id: 1,
            code: code.into(),
            name: "Moutai".into(),
            api_url: api.map(String::from),
            new_price: None,
            prev_close: None,
            open_price: None,
            high_price: None,
            low_price: None,
            volume: None,
            threshold_price: Some(1500.0),
            notify_count: 0,
            updated_at: Utc::now(),
        }
    }

    fn quote(price: f64, low: f64) -> StockQuote {
        StockQuote {
            stock_code: "600519".into(),
            company_name: "Kweichow Moutai".into(),
            price: Some(price),
            low_price: Some(low),
            ..StockQuote::default()
        }
    }

    struct Fixture {
        worker: StockRefreshWorker,
        store: Arc<MemoryStockStore>,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<CapturingNotifier>,
    }

    fn fixture(fail_first: usize, q: StockQuote) -> Fixture {
        fixture_with_cache(Arc::new(MemoryCache::new()), fail_first, q)
    }

    fn fixture_with_cache(cache: Arc<dyn Cache>, fail_first: usize, q: StockQuote) -> Fixture {
        let store = Arc::new(MemoryStockStore::new());
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicUsize::new(0),
            fail_first,
            quote: q,
        });
        let notifier = Arc::new(CapturingNotifier::default());
        let config = StockWorkerConfig {
            retry_base_delay: Duration::from_millis(1),
            ..StockWorkerConfig::default()
        };
        let worker = StockRefreshWorker::new(
            "node-a",
            cache,
            store.clone(),
            provider.clone(),
            notifier.clone(),
            config,
        );
        Fixture {
            worker,
            store,
            provider,
            notifier,
        }
    }

    fn task(trace: &str) -> StockRefreshTask {
        StockRefreshTask {
            trace_id: trace.into(),
            stock_code: "600519".into(),
        }
    }

    #[tokio::test]
    async fn test_refresh_updates_stock_and_trades() {
        let f = fixture(0, quote(1700.0, 1650.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=1.600519")));
        f.store.insert_trade(StockTrade {
            id: 1,
            user_id: 1,
            stock_code: "600519".into(),
            buy_price: 1600.0,
            shares: 10,
            sell_target_price: Some(1800.0),
            latest_price: None,
            net_profit: None,
            target_net_profit: None,
            total_cost: 0.0,
            is_sell: false,
        });

        let outcome = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed(StockTaskState::Success));

        let saved = f.store.get_watch_stock("600519").await.unwrap().unwrap();
        assert_eq!(saved.new_price, Some(1700.0));
        let trades = f.store.list_trades("600519").await.unwrap();
        assert_eq!(trades[0].net_profit, Some(1000.0));

        let status = f.worker.status("600519").await.unwrap().unwrap();
        assert_eq!(status.status, StockTaskState::Success);
        assert_eq!(status.last_result.as_deref(), Some("Price=1700"));
        assert!(f.notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_trace_is_a_no_op() {
        let f = fixture(0, quote(1400.0, 1390.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=1.600519")));

        assert_eq!(
            f.worker.refresh(&task("t1")).await.unwrap(),
            RefreshOutcome::Completed(StockTaskState::Success)
        );
        assert_eq!(f.worker.refresh(&task("t1")).await.unwrap(), RefreshOutcome::Duplicate);

        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.notifier.sent.lock().len(), 1);
        assert_eq!(f.store.list_refresh_records(Some("600519"), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_skipped() {
        let f = fixture(0, quote(1700.0, 1650.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=null")));

        let outcome = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed(StockTaskState::Skipped));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);

        let records = f.store.list_refresh_records(Some("600519"), 10).await.unwrap();
        assert_eq!(records[0].execute_result, "INVALID_URL");
    }

    #[tokio::test]
    async fn test_fetch_retries_then_fails() {
        let f = fixture(5, quote(1700.0, 1650.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=1.600519")));

        let outcome = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed(StockTaskState::Failed));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_threshold_alerts_are_capped() {
        let f = fixture(0, quote(1400.0, 1390.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=1.600519")));

        for trace in ["t1", "t2", "t3", "t4", "t5"] {
            f.worker.refresh(&task(trace)).await.unwrap();
        }
        assert_eq!(f.notifier.sent.lock().len(), 3);
        let saved = f.store.get_watch_stock("600519").await.unwrap().unwrap();
        assert_eq!(saved.notify_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_stock_is_skipped() {
        let f = fixture(0, quote(1.0, 1.0));
        let outcome = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed(StockTaskState::Skipped));
    }

    #[tokio::test]
    async fn test_status_write_failure_still_records_attempt() {
        let f = fixture_with_cache(Arc::new(HashlessCache(MemoryCache::new())), 0, quote(1700.0, 1650.0));
        f.store.insert_watch_stock(stock("600519", Some("https://quote?secid=1.600519")));

        let outcome = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed(StockTaskState::Failed));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);

        let records = f.store.list_refresh_records(Some("600519"), 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "FAILED");
        assert_eq!(records[0].trace_id, "t1");

        // The guard was released, so the same trace is attempted again.
        let again = f.worker.refresh(&task("t1")).await.unwrap();
        assert_eq!(again, RefreshOutcome::Completed(StockTaskState::Failed));
        assert_eq!(f.store.list_refresh_records(Some("600519"), 10).await.unwrap().len(), 2);
    }
}
