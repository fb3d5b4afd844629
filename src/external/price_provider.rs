use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ExternalPricePoint {
    pub date: NaiveDate,
    pub close: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct ExternalDividend {
    pub ex_date: NaiveDate,
    pub amount_per_share: BigDecimal,
}

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("ticker not found")]
    NotFound,
}

/// Market-data access behind one seam, so jobs never see a concrete wire
/// format and tests can substitute a fake.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError>;

    /// Latest spot rate for the currency pair.
    async fn fetch_fx_rate(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<BigDecimal, PriceProviderError>;

    async fn fetch_dividends(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalDividend>, PriceProviderError>;
}
