use sqlx::PgPool;

use crate::models::{PriorityTier, TickerAnalysis, WatchedTicker};

pub async fn upsert_watched_ticker(
    pool: &PgPool,
    ticker: &str,
    tier: PriorityTier,
    source: &str,
    source_count: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO watched_tickers (ticker, priority_tier, is_active, source, source_count, updated_at)
        VALUES ($1, $2, TRUE, $3, $4, NOW())
        ON CONFLICT (ticker) DO UPDATE SET
            priority_tier = EXCLUDED.priority_tier,
            is_active = TRUE,
            source = EXCLUDED.source,
            source_count = EXCLUDED.source_count,
            updated_at = NOW()
        "#,
    )
    .bind(ticker)
    .bind(tier)
    .bind(source)
    .bind(source_count)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deactivate tickers absent from today's derivation. Rows are never
/// deleted; history stays queryable.
pub async fn deactivate_absent(
    pool: &PgPool,
    active_tickers: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE watched_tickers
        SET is_active = FALSE, updated_at = NOW()
        WHERE is_active = TRUE AND NOT (ticker = ANY($1))
        "#,
    )
    .bind(active_tickers)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Active tickers ordered tier A first, then alphabetically.
pub async fn active_by_tier(pool: &PgPool) -> Result<Vec<WatchedTicker>, sqlx::Error> {
    sqlx::query_as::<_, WatchedTicker>(
        r#"
        SELECT ticker, priority_tier, is_active, source, source_count, updated_at
        FROM watched_tickers
        WHERE is_active = TRUE
        ORDER BY priority_tier ASC, ticker ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn insert_ticker_analysis(
    pool: &PgPool,
    analysis: &TickerAnalysis,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO ticker_analyses
            (id, ticker, as_of, summary, sentiment, sentiment_score,
             article_count, social_volume, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (ticker, as_of) DO NOTHING
        "#,
    )
    .bind(analysis.id)
    .bind(&analysis.ticker)
    .bind(analysis.as_of)
    .bind(&analysis.summary)
    .bind(&analysis.sentiment)
    .bind(analysis.sentiment_score)
    .bind(analysis.article_count)
    .bind(analysis.social_volume)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Most recent digest for a ticker; drives the daily dedupe check and
/// gives the analyzer yesterday's context.
pub async fn latest_analysis(
    pool: &PgPool,
    ticker: &str,
) -> Result<Option<TickerAnalysis>, sqlx::Error> {
    sqlx::query_as::<_, TickerAnalysis>(
        r#"
        SELECT id, ticker, as_of, summary, sentiment, sentiment_score,
               article_count, social_volume, created_at
        FROM ticker_analyses
        WHERE ticker = $1
        ORDER BY as_of DESC
        LIMIT 1
        "#,
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
}
