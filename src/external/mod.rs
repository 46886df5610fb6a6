pub mod http_quote;
pub mod quote_provider;
