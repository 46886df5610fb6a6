use super::StockStore;
use crate::db::stock_queries;
use crate::errors::AppError;
use crate::models::{NewStockRefreshRecord, StockRefreshRecord, StockTrade, WatchStock};
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStockStore {
    pool: PgPool,
}

impl PgStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn get_watch_stock(&self, code: &str) -> Result<Option<WatchStock>, AppError> {
        Ok(stock_queries::get_watch_stock(&self.pool, code).await?)
    }

    async fn list_watch_stocks(&self) -> Result<Vec<WatchStock>, AppError> {
        Ok(stock_queries::list_watch_stocks(&self.pool).await?)
    }

    async fn update_watch_stock(&self, stock: &WatchStock) -> Result<(), AppError> {
        Ok(stock_queries::update_watch_stock(&self.pool, stock).await?)
    }

    async fn list_trades(&self, code: &str) -> Result<Vec<StockTrade>, AppError> {
        Ok(stock_queries::list_trades(&self.pool, code).await?)
    }

    async fn update_trade(&self, trade: &StockTrade) -> Result<(), AppError> {
        Ok(stock_queries::update_trade(&self.pool, trade).await?)
    }

    async fn insert_refresh_record(&self, record: &NewStockRefreshRecord) -> Result<StockRefreshRecord, AppError> {
        Ok(stock_queries::insert_refresh_record(&self.pool, record).await?)
    }

    async fn list_refresh_records(&self, code: Option<&str>, limit: i64) -> Result<Vec<StockRefreshRecord>, AppError> {
        Ok(stock_queries::list_refresh_records(&self.pool, code, limit).await?)
    }
}
