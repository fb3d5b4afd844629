use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Daily valued position for a fund. Upsert key: (fund, ticker, date).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioPosition {
    pub id: Uuid,
    pub fund: String,
    pub ticker: String,
    pub date: NaiveDate,
    pub shares: BigDecimal,
    pub close_price: BigDecimal,
    pub market_value: BigDecimal,
    pub currency: String,
}

/// FX observation. Upsert key: (from_currency, to_currency, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: BigDecimal,
    pub timestamp: DateTime<Utc>,
    /// "provider" for live quotes, "fallback" for the static degradation table.
    pub source: String,
}

/// Dividend payment attributed to a holding.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dividend {
    pub id: Uuid,
    pub ticker: String,
    pub ex_date: NaiveDate,
    pub pay_date: Option<NaiveDate>,
    pub amount_per_share: BigDecimal,
    pub currency: String,
}

/// Daily close for a benchmark series.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BenchmarkBar {
    pub id: Uuid,
    pub benchmark: String,
    pub date: NaiveDate,
    pub close: BigDecimal,
}

/// Insider transaction scraped from the filings aggregator.
/// Natural key: (ticker, insider_name, transaction_date, type, shares,
/// price_per_share) — the source has no stable row id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InsiderTrade {
    pub id: Uuid,
    pub ticker: String,
    pub insider_name: String,
    pub insider_title: Option<String>,
    pub transaction_date: NaiveDate,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub trade_type: String,
    pub shares: i64,
    pub price_per_share: Option<BigDecimal>,
    pub total_value: Option<BigDecimal>,
    pub fetched_at: DateTime<Utc>,
}

/// Congressional trade disclosure. Natural key:
/// (politician, ticker, transaction_date, amount).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CongressTrade {
    pub id: Uuid,
    pub politician: String,
    pub chamber: Option<String>,
    pub ticker: String,
    pub transaction_date: NaiveDate,
    pub disclosure_date: Option<NaiveDate>,
    pub trade_type: String,
    /// Disclosed dollar range, e.g. "$1,001 - $15,000".
    pub amount: String,
    pub batch_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
}
