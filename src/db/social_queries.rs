use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{CrowdSentimentLabel, SocialMetric, SocialPost};

/// Insert-only posts keyed by (platform, post_id). A duplicate is a no-op;
/// returns true when the row is new.
pub async fn insert_post(
    pool: &PgPool,
    platform: &str,
    post_id: &str,
    content: &str,
    author: &str,
    posted_at: Option<DateTime<Utc>>,
    engagement_score: f64,
    tickers: &[String],
    metric_id: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO social_posts
            (id, platform, post_id, content, author, posted_at,
             engagement_score, tickers, metric_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (platform, post_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(platform)
    .bind(post_id)
    .bind(content)
    .bind(author)
    .bind(posted_at)
    .bind(engagement_score)
    .bind(tickers)
    .bind(metric_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Append one metric observation to the time series. Returns the new id so
/// posts can be linked to it.
pub async fn insert_metric(
    pool: &PgPool,
    ticker: &str,
    platform: &str,
    volume: i32,
    sentiment_label: CrowdSentimentLabel,
    sentiment_score: f64,
    bull_bear_ratio: Option<f64>,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO social_metrics
            (id, ticker, platform, volume, sentiment_label, sentiment_score,
             bull_bear_ratio, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        "#,
    )
    .bind(id)
    .bind(ticker)
    .bind(platform)
    .bind(volume)
    .bind(sentiment_label)
    .bind(sentiment_score)
    .bind(bull_bear_ratio)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Latest observation for a ticker — the "latest per (ticker, platform)"
/// view over the append-only series, scoped to one ticker.
pub async fn latest_metric_for(
    pool: &PgPool,
    ticker: &str,
) -> Result<Option<SocialMetric>, sqlx::Error> {
    sqlx::query_as::<_, SocialMetric>(
        r#"
        SELECT id, ticker, platform, volume, sentiment_label, sentiment_score,
               bull_bear_ratio, created_at
        FROM social_metrics
        WHERE ticker = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
}

/// Tickers with an extreme latest reading (|score| ≥ 1.5 or an extreme
/// label), for the watchlist derivation.
pub async fn tickers_with_extreme_sentiment(
    pool: &PgPool,
    since: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT ticker FROM (
            SELECT DISTINCT ON (ticker, platform) ticker, sentiment_label, sentiment_score, created_at
            FROM social_metrics
            ORDER BY ticker, platform, created_at DESC
        ) latest
        WHERE created_at >= $1::date
          AND (ABS(sentiment_score) >= 1.5 OR sentiment_label IN ('EUPHORIC', 'FEARFUL'))
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get("ticker")).collect())
}

/// Most engaging recent posts mentioning a ticker, for analysis corpora.
pub async fn recent_posts_for_ticker(
    pool: &PgPool,
    ticker: &str,
    days: i64,
    limit: i64,
) -> Result<Vec<SocialPost>, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    sqlx::query_as::<_, SocialPost>(
        r#"
        SELECT id, platform, post_id, content, author, posted_at,
               engagement_score, tickers, metric_id
        FROM social_posts
        WHERE $1 = ANY(tickers) AND posted_at > $2
        ORDER BY engagement_score DESC
        LIMIT $3
        "#,
    )
    .bind(ticker)
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn post_volume_for_ticker(
    pool: &PgPool,
    ticker: &str,
    days: i64,
) -> Result<i64, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS volume FROM social_posts
        WHERE $1 = ANY(tickers) AND posted_at > $2
        "#,
    )
    .bind(ticker)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(row.get("volume"))
}
