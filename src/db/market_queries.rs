use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{BenchmarkBar, CongressTrade, InsiderTrade, PortfolioPosition};

// --- Funds & positions ------------------------------------------------------

pub async fn production_funds(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT name FROM funds WHERE is_production = TRUE ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get("name")).collect())
}

pub async fn distinct_held_tickers(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT DISTINCT ticker FROM trades WHERE is_open = TRUE ORDER BY ticker",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get("ticker")).collect())
}

/// Open lots per fund with share counts and currency, the input to daily
/// position valuation.
#[derive(Debug, sqlx::FromRow)]
pub struct OpenHolding {
    pub fund: String,
    pub ticker: String,
    pub shares: BigDecimal,
    pub currency: String,
}

pub async fn open_holdings(pool: &PgPool) -> Result<Vec<OpenHolding>, sqlx::Error> {
    sqlx::query_as::<_, OpenHolding>(
        r#"
        SELECT fund, ticker, SUM(shares) AS shares, MAX(currency) AS currency
        FROM trades
        WHERE is_open = TRUE
        GROUP BY fund, ticker
        HAVING SUM(shares) > 0
        ORDER BY fund, ticker
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn upsert_position(
    pool: &PgPool,
    position: &PortfolioPosition,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO portfolio_positions
            (id, fund, ticker, date, shares, close_price, market_value, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (fund, ticker, date) DO UPDATE SET
            shares = EXCLUDED.shares,
            close_price = EXCLUDED.close_price,
            market_value = EXCLUDED.market_value,
            currency = EXCLUDED.currency
        WHERE (portfolio_positions.shares, portfolio_positions.close_price,
               portfolio_positions.market_value, portfolio_positions.currency)
           IS DISTINCT FROM
              (EXCLUDED.shares, EXCLUDED.close_price,
               EXCLUDED.market_value, EXCLUDED.currency)
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(position.id)
    .bind(&position.fund)
    .bind(&position.ticker)
    .bind(position.date)
    .bind(&position.shares)
    .bind(&position.close_price)
    .bind(&position.market_value)
    .bind(&position.currency)
    .fetch_optional(pool)
    .await?;
    // No row back means the conflicting row was identical: a clean no-op
    Ok(row.map(|r| r.get::<bool, _>("inserted")).unwrap_or(false))
}

pub async fn count_positions_for_date(
    pool: &PgPool,
    date: NaiveDate,
    funds: &[String],
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n FROM portfolio_positions
        WHERE date = $1 AND fund = ANY($2)
        "#,
    )
    .bind(date)
    .bind(funds)
    .fetch_one(pool)
    .await?;
    Ok(row.get("n"))
}

pub async fn positions_for_date(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Vec<PortfolioPosition>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioPosition>(
        r#"
        SELECT id, fund, ticker, date, shares, close_price, market_value, currency
        FROM portfolio_positions
        WHERE date = $1
        ORDER BY fund, ticker
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await
}

// --- Exchange rates ---------------------------------------------------------

pub async fn upsert_exchange_rate(
    pool: &PgPool,
    from_currency: &str,
    to_currency: &str,
    rate: &BigDecimal,
    timestamp: DateTime<Utc>,
    source: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO exchange_rates (id, from_currency, to_currency, rate, timestamp, source)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (from_currency, to_currency, timestamp) DO UPDATE SET
            rate = EXCLUDED.rate, source = EXCLUDED.source
        WHERE (exchange_rates.rate, exchange_rates.source)
           IS DISTINCT FROM (EXCLUDED.rate, EXCLUDED.source)
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(from_currency)
    .bind(to_currency)
    .bind(rate)
    .bind(timestamp)
    .bind(source)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get::<bool, _>("inserted")).unwrap_or(false))
}

/// Daily FX rate for a date: the last observation at or before end of day.
pub async fn rate_for_date(
    pool: &PgPool,
    from_currency: &str,
    to_currency: &str,
    date: NaiveDate,
) -> Result<Option<BigDecimal>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT rate FROM exchange_rates
        WHERE from_currency = $1 AND to_currency = $2
          AND timestamp < ($3::date + INTERVAL '1 day')
        ORDER BY timestamp DESC
        LIMIT 1
        "#,
    )
    .bind(from_currency)
    .bind(to_currency)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("rate")))
}

// --- Benchmarks & dividends -------------------------------------------------

pub async fn upsert_benchmark_bar(pool: &PgPool, bar: &BenchmarkBar) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO benchmark_bars (id, benchmark, date, close)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (benchmark, date) DO UPDATE SET close = EXCLUDED.close
        WHERE benchmark_bars.close IS DISTINCT FROM EXCLUDED.close
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(bar.id)
    .bind(&bar.benchmark)
    .bind(bar.date)
    .bind(&bar.close)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get::<bool, _>("inserted")).unwrap_or(false))
}

pub async fn upsert_dividend(
    pool: &PgPool,
    ticker: &str,
    ex_date: NaiveDate,
    pay_date: Option<NaiveDate>,
    amount_per_share: &BigDecimal,
    currency: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO dividends (id, ticker, ex_date, pay_date, amount_per_share, currency)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (ticker, ex_date) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(ticker)
    .bind(ex_date)
    .bind(pay_date)
    .bind(amount_per_share)
    .bind(currency)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

// --- Scraped trades ---------------------------------------------------------

pub async fn upsert_insider_trade(pool: &PgPool, trade: &InsiderTrade) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO insider_trades
            (id, ticker, insider_name, insider_title, transaction_date, type,
             shares, price_per_share, total_value, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        ON CONFLICT (ticker, insider_name, transaction_date, type, shares, price_per_share)
        DO NOTHING
        "#,
    )
    .bind(trade.id)
    .bind(&trade.ticker)
    .bind(&trade.insider_name)
    .bind(&trade.insider_title)
    .bind(trade.transaction_date)
    .bind(&trade.trade_type)
    .bind(trade.shares)
    .bind(&trade.price_per_share)
    .bind(&trade.total_value)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn upsert_congress_trade(
    pool: &PgPool,
    trade: &CongressTrade,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO congress_trades
            (id, politician, chamber, ticker, transaction_date, disclosure_date,
             trade_type, amount, batch_id, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        ON CONFLICT (politician, ticker, transaction_date, amount) DO NOTHING
        "#,
    )
    .bind(trade.id)
    .bind(&trade.politician)
    .bind(&trade.chamber)
    .bind(&trade.ticker)
    .bind(trade.transaction_date)
    .bind(trade.disclosure_date)
    .bind(&trade.trade_type)
    .bind(&trade.amount)
    .bind(&trade.batch_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Tickers traded by congress members since the date, for the watchlist.
pub async fn congress_tickers_since(
    pool: &PgPool,
    since: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT ticker FROM congress_trades
        WHERE transaction_date >= $1 AND ticker <> ''
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get("ticker")).collect())
}

// --- Performance metrics ----------------------------------------------------

pub async fn upsert_performance_metric(
    pool: &PgPool,
    fund: &str,
    date: NaiveDate,
    total_value_cad: &BigDecimal,
    daily_return_pct: Option<f64>,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO performance_metrics (id, fund, date, total_value_cad, daily_return_pct)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (fund, date) DO UPDATE SET
            total_value_cad = EXCLUDED.total_value_cad,
            daily_return_pct = EXCLUDED.daily_return_pct
        WHERE (performance_metrics.total_value_cad, performance_metrics.daily_return_pct)
           IS DISTINCT FROM (EXCLUDED.total_value_cad, EXCLUDED.daily_return_pct)
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(fund)
    .bind(date)
    .bind(total_value_cad)
    .bind(daily_return_pct)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get::<bool, _>("inserted")).unwrap_or(false))
}

pub async fn fund_value_for_date(
    pool: &PgPool,
    fund: &str,
    date: NaiveDate,
) -> Result<Option<BigDecimal>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT total_value_cad FROM performance_metrics WHERE fund = $1 AND date = $2",
    )
    .bind(fund)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("total_value_cad")))
}
