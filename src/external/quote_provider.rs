use crate::models::StockQuote;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the realtime quote behind a watch stock's configured endpoint.
    async fn fetch_realtime(&self, api_url: &str) -> Result<StockQuote, QuoteProviderError>;
}
