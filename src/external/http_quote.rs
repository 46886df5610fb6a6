use crate::external::quote_provider::{QuoteProvider, QuoteProviderError};
use crate::models::StockQuote;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the quote service, which scrapes the upstream page on our behalf.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RealtimeRequest<'a> {
    url: &'a str,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str) -> Result<Self, QuoteProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QuoteProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn fetch_realtime(&self, api_url: &str) -> Result<StockQuote, QuoteProviderError> {
        let url = format!("{}/stock/realtime", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&RealtimeRequest { url: api_url })
            .send()
            .await
            .map_err(|e| QuoteProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QuoteProviderError::BadResponse(format!("HTTP {}: {}", status, body)));
        }

        let quote: StockQuote = resp
            .json()
            .await
            .map_err(|e| QuoteProviderError::Parse(e.to_string()))?;

        if quote.price.is_none() && quote.stock_code.is_empty() {
            return Err(QuoteProviderError::BadResponse("empty quote".into()));
        }

        Ok(quote)
    }
}
