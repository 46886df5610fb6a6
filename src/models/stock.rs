use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// A stock on the watch list, refreshed by the stock worker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WatchStock {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Quote endpoint forwarded to the quote service.
    pub api_url: Option<String>,
    pub new_price: Option<f64>,
    pub prev_close: Option<f64>,
    pub open_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub volume: Option<i64>,
    pub threshold_price: Option<f64>,
    /// Alerts already sent for this stock.
    pub notify_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl WatchStock {
    pub fn has_valid_api(&self) -> bool {
        match self.api_url.as_deref() {
            Some(url) => !url.trim().is_empty() && !url.contains("secid=null"),
            None => false,
        }
    }

    pub fn apply_quote(&mut self, quote: &StockQuote) {
        if quote.price.is_some() {
            self.new_price = quote.price;
        }
        if !quote.company_name.is_empty() {
            self.name = quote.company_name.clone();
        }
        self.prev_close = quote.prev_close.or(self.prev_close);
        self.open_price = quote.open_price.or(self.open_price);
        self.high_price = quote.high_price.or(self.high_price);
        self.low_price = quote.low_price.or(self.low_price);
        self.volume = quote.volume.or(self.volume);
        self.updated_at = Utc::now();
    }

    /// Low price crossed under the configured threshold.
    pub fn below_threshold(&self) -> bool {
        matches!((self.low_price, self.threshold_price), (Some(low), Some(threshold)) if low < threshold)
    }
}

/// Realtime quote returned by the quote service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuote {
    pub stock_code: String,
    #[serde(default)]
    pub company_name: String,
    pub price: Option<f64>,
    pub prev_close: Option<f64>,
    pub open_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub volume: Option<i64>,
}

/// A user's position in a watched stock, repriced on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockTrade {
    pub id: i64,
    pub user_id: i64,
    pub stock_code: String,
    pub buy_price: f64,
    pub shares: i64,
    pub sell_target_price: Option<f64>,
    pub latest_price: Option<f64>,
    pub net_profit: Option<f64>,
    pub target_net_profit: Option<f64>,
    pub total_cost: f64,
    pub is_sell: bool,
}

impl StockTrade {
    pub fn reprice(&mut self, price: f64) {
        let shares = self.shares as f64;
        self.latest_price = Some(price);
        self.net_profit = Some((price - self.buy_price) * shares);
        self.target_net_profit = self
            .sell_target_price
            .map(|target| (target - self.buy_price) * shares);
        self.total_cost = self.buy_price * shares;
        if let Some(target) = self.sell_target_price {
            if (target - price).abs() < f64::EPSILON {
                self.is_sell = true;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockTaskState {
    Occupied,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StockTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockTaskState::Occupied => "OCCUPIED",
            StockTaskState::Running => "RUNNING",
            StockTaskState::Success => "SUCCESS",
            StockTaskState::Failed => "FAILED",
            StockTaskState::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OCCUPIED" => Some(StockTaskState::Occupied),
            "RUNNING" => Some(StockTaskState::Running),
            "SUCCESS" => Some(StockTaskState::Success),
            "FAILED" => Some(StockTaskState::Failed),
            "SKIPPED" => Some(StockTaskState::Skipped),
            _ => None,
        }
    }
}

/// Per-stock status hash kept in the cache, overwritten on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTaskStatus {
    pub stock_code: String,
    pub status: StockTaskState,
    pub occupied_by_node: String,
    pub occupied_time: DateTime<Utc>,
    pub trace_id: String,
    pub last_result: Option<String>,
}

impl StockTaskStatus {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("stockCode".to_string(), self.stock_code.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("occupiedByNode".to_string(), self.occupied_by_node.clone()),
            ("occupiedTime".to_string(), self.occupied_time.timestamp_millis().to_string()),
            ("traceId".to_string(), self.trace_id.clone()),
        ];
        if let Some(result) = &self.last_result {
            fields.push(("lastResult".to_string(), result.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let millis: i64 = fields.get("occupiedTime")?.parse().ok()?;
        Some(Self {
            stock_code: fields.get("stockCode")?.clone(),
            status: StockTaskState::parse(fields.get("status")?)?,
            occupied_by_node: fields.get("occupiedByNode").cloned().unwrap_or_default(),
            occupied_time: DateTime::<Utc>::from_timestamp_millis(millis)?,
            trace_id: fields.get("traceId").cloned().unwrap_or_default(),
            last_result: fields.get("lastResult").cloned(),
        })
    }
}

/// Audit row written once per real refresh attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockRefreshRecord {
    pub id: i64,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub status: String,
    pub execute_result: String,
    pub node_id: String,
    pub trace_id: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStockRefreshRecord {
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub status: StockTaskState,
    pub execute_result: String,
    pub node_id: String,
    pub trace_id: String,
}

/// Unit of work handed to the stock worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRefreshTask {
    pub trace_id: String,
    pub stock_code: String,
}
