use crate::models::{NewStockRefreshRecord, StockRefreshRecord, StockTrade, WatchStock};
use sqlx::PgPool;

// ==============================================================================
// Watch stocks
// ==============================================================================

pub async fn get_watch_stock(pool: &PgPool, code: &str) -> Result<Option<WatchStock>, sqlx::Error> {
    sqlx::query_as::<_, WatchStock>("SELECT * FROM watch_stocks WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await
}

pub async fn list_watch_stocks(pool: &PgPool) -> Result<Vec<WatchStock>, sqlx::Error> {
    sqlx::query_as::<_, WatchStock>("SELECT * FROM watch_stocks ORDER BY code")
        .fetch_all(pool)
        .await
}

pub async fn update_watch_stock(pool: &PgPool, stock: &WatchStock) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE watch_stocks
        SET name = $2, new_price = $3, prev_close = $4, open_price = $5, high_price = $6,
            low_price = $7, volume = $8, notify_count = $9, updated_at = NOW()
        WHERE code = $1
        "#,
    )
    .bind(&stock.code)
    .bind(&stock.name)
    .bind(stock.new_price)
    .bind(stock.prev_close)
    .bind(stock.open_price)
    .bind(stock.high_price)
    .bind(stock.low_price)
    .bind(stock.volume)
    .bind(stock.notify_count)
    .execute(pool)
    .await?;
    Ok(())
}

// ==============================================================================
// Trades
// ==============================================================================

pub async fn list_trades(pool: &PgPool, code: &str) -> Result<Vec<StockTrade>, sqlx::Error> {
    sqlx::query_as::<_, StockTrade>("SELECT * FROM stock_trades WHERE stock_code = $1 ORDER BY id")
        .bind(code)
        .fetch_all(pool)
        .await
}

pub async fn update_trade(pool: &PgPool, trade: &StockTrade) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE stock_trades
        SET latest_price = $2, net_profit = $3, target_net_profit = $4,
            total_cost = $5, is_sell = $6
        WHERE id = $1
        "#,
    )
    .bind(trade.id)
    .bind(trade.latest_price)
    .bind(trade.net_profit)
    .bind(trade.target_net_profit)
    .bind(trade.total_cost)
    .bind(trade.is_sell)
    .execute(pool)
    .await?;
    Ok(())
}

// ==============================================================================
// Refresh audit records
// ==============================================================================

pub async fn insert_refresh_record(
    pool: &PgPool,
    record: &NewStockRefreshRecord,
) -> Result<StockRefreshRecord, sqlx::Error> {
    sqlx::query_as::<_, StockRefreshRecord>(
        r#"
        INSERT INTO stock_refresh_records
            (stock_code, stock_name, status, execute_result, node_id, trace_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&record.stock_code)
    .bind(&record.stock_name)
    .bind(record.status.as_str())
    .bind(&record.execute_result)
    .bind(&record.node_id)
    .bind(&record.trace_id)
    .fetch_one(pool)
    .await
}

pub async fn list_refresh_records(
    pool: &PgPool,
    code: Option<&str>,
    limit: i64,
) -> Result<Vec<StockRefreshRecord>, sqlx::Error> {
    sqlx::query_as::<_, StockRefreshRecord>(
        r#"
        SELECT * FROM stock_refresh_records
        WHERE ($1::TEXT IS NULL OR stock_code = $1)
        ORDER BY executed_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(code)
    .bind(limit)
    .fetch_all(pool)
    .await
}
