use std::sync::Arc;

use anyhow::Context;
use money_scheduler::cache::{Cache, MemoryCache, RedisCache};
use money_scheduler::config::{CacheBackend, SchedulerConfig, StoreBackend};
use money_scheduler::external::http_quote::HttpQuoteProvider;
use money_scheduler::jobs;
use money_scheduler::logging::{init_logging, LoggingConfig};
use money_scheduler::node::{Backends, SchedulerNode};
use money_scheduler::services::handlers::HandlerRegistry;
use money_scheduler::services::notification::notifier_from_env;
use money_scheduler::store::{
    JobStore, MemoryJobStore, MemoryStockStore, PgJobStore, PgStockStore, StockStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = SchedulerConfig::from_env();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env(&config.node_id))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    tracing::info!("🖥️  Starting scheduler node {}", config.node_id);

    let (job_store, stock_store): (Arc<dyn JobStore>, Arc<dyn StockStore>) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to Postgres")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("✅ Connected to Postgres, migrations applied");
            (
                Arc::new(PgJobStore::new(pool.clone())),
                Arc::new(PgStockStore::new(pool)),
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("⚠️  Using in-memory job store, state is lost on restart");
            (Arc::new(MemoryJobStore::new()), Arc::new(MemoryStockStore::new()))
        }
    };

    let cache: Arc<dyn Cache> = match config.cache_backend {
        CacheBackend::Redis => {
            let redis_url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required for the redis cache")?;
            Arc::new(RedisCache::connect(redis_url).await?)
        }
        CacheBackend::Memory => {
            tracing::warn!("⚠️  Using in-memory cache, this node cannot share work");
            Arc::new(MemoryCache::new())
        }
    };

    let quotes = HttpQuoteProvider::new(&config.quote_service_url)
        .map_err(|e| anyhow::anyhow!("Failed to create quote client: {}", e))?;

    let mut handlers = HandlerRegistry::new();
    jobs::register_builtin(&mut handlers);

    let backends = Backends {
        job_store,
        stock_store,
        cache,
        quotes: Arc::new(quotes),
        notifier: notifier_from_env(),
    };

    let bind_addr = config.bind_addr.clone();
    let node = SchedulerNode::build(config, backends, handlers).await?;

    let shutdown = CancellationToken::new();
    let loops = node.start(shutdown.clone()).await?;

    let app = money_scheduler::app::create_app(node.app_state());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("🚀 Scheduler node running at http://{}/", bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("🛑 Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    node.stop(loops).await;
    Ok(())
}
