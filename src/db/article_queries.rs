use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Article, ArticleAnalysis};

/// Upsert on url. A conflicting row keeps its original `fetched_at` and
/// content; only the analysis fields are rewritten (invariant A1). Returns
/// true when a new row was inserted.
pub async fn upsert_article(
    pool: &PgPool,
    url: &str,
    title: &str,
    source: &str,
    published_at: Option<DateTime<Utc>>,
    content: &str,
    analysis: &ArticleAnalysis,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO articles
            (id, url, title, source, published_at, fetched_at, content,
             summary, tickers, sector, sentiment, sentiment_score,
             claims, fact_check, conclusion, relevance_score)
        VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (url) DO UPDATE SET
            summary = COALESCE(EXCLUDED.summary, articles.summary),
            tickers = CASE WHEN EXCLUDED.tickers = '{}' THEN articles.tickers
                           ELSE EXCLUDED.tickers END,
            sector = COALESCE(EXCLUDED.sector, articles.sector),
            sentiment = COALESCE(EXCLUDED.sentiment, articles.sentiment),
            sentiment_score = COALESCE(EXCLUDED.sentiment_score, articles.sentiment_score),
            claims = COALESCE(EXCLUDED.claims, articles.claims),
            fact_check = COALESCE(EXCLUDED.fact_check, articles.fact_check),
            conclusion = COALESCE(EXCLUDED.conclusion, articles.conclusion),
            relevance_score = COALESCE(EXCLUDED.relevance_score, articles.relevance_score)
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(url)
    .bind(title)
    .bind(source)
    .bind(published_at)
    .bind(content)
    .bind(&analysis.summary)
    .bind(&analysis.tickers)
    .bind(&analysis.sector)
    .bind(analysis.sentiment)
    .bind(analysis.sentiment_score)
    .bind(&analysis.claims)
    .bind(&analysis.fact_check)
    .bind(&analysis.conclusion)
    .bind(analysis.relevance_score)
    .fetch_one(pool)
    .await?;

    Ok(row.get::<bool, _>("inserted"))
}

pub async fn exists_by_url(pool: &PgPool, url: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 AS one FROM articles WHERE url = $1 LIMIT 1")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Rewrite analysis fields for an existing article (re-analyze path).
pub async fn update_analysis(
    pool: &PgPool,
    url: &str,
    analysis: &ArticleAnalysis,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE articles SET
            summary = $2, tickers = $3, sector = $4, sentiment = $5,
            sentiment_score = $6, claims = $7, fact_check = $8,
            conclusion = $9, relevance_score = $10
        WHERE url = $1
        "#,
    )
    .bind(url)
    .bind(&analysis.summary)
    .bind(&analysis.tickers)
    .bind(&analysis.sector)
    .bind(analysis.sentiment)
    .bind(analysis.sentiment_score)
    .bind(&analysis.claims)
    .bind(&analysis.fact_check)
    .bind(&analysis.conclusion)
    .bind(analysis.relevance_score)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_embedding(
    pool: &PgPool,
    url: &str,
    embedding: &[f32],
) -> Result<(), sqlx::Error> {
    let value = serde_json::to_value(embedding).unwrap_or(serde_json::Value::Null);
    sqlx::query("UPDATE articles SET embedding = $2 WHERE url = $1")
        .bind(url)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Articles without a summary, for re-analysis sweeps (invariant P2: an
/// analyzer failure leaves the item persisted with a null summary).
pub async fn find_unanalyzed(pool: &PgPool, limit: i64) -> Result<Vec<Article>, sqlx::Error> {
    sqlx::query_as::<_, Article>(
        r#"
        SELECT id, url, title, source, published_at, fetched_at, content,
               summary, tickers, sector, sentiment, sentiment_score,
               claims, fact_check, conclusion, relevance_score, embedding
        FROM articles
        WHERE summary IS NULL
        ORDER BY fetched_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn recent_for_ticker(
    pool: &PgPool,
    ticker: &str,
    days: i64,
    limit: i64,
) -> Result<Vec<Article>, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(days);
    sqlx::query_as::<_, Article>(
        r#"
        SELECT id, url, title, source, published_at, fetched_at, content,
               summary, tickers, sector, sentiment, sentiment_score,
               claims, fact_check, conclusion, relevance_score, embedding
        FROM articles
        WHERE $1 = ANY(tickers) AND fetched_at > $2
        ORDER BY fetched_at DESC
        LIMIT $3
        "#,
    )
    .bind(ticker)
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Distinct tickers mentioned in articles fetched in the window, for the
/// watchlist derivation.
pub async fn tickers_mentioned_since(
    pool: &PgPool,
    since: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT unnest(tickers) AS ticker
        FROM articles
        WHERE fetched_at >= $1::date AND tickers <> '{}'
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get("ticker")).collect())
}
