//! Watchlist derivation: merge the four ticker sources — current holdings,
//! recent congress trades, article mentions, extreme social sentiment —
//! into tiers by how many independent sources agree. Absent tickers are
//! deactivated, never deleted.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::db::{article_queries, market_queries, social_queries, watchlist_queries};
use crate::errors::AppError;
use crate::models::PriorityTier;
use crate::scheduler::{JobContext, JobOutcome};

const CONGRESS_LOOKBACK_DAYS: i64 = 30;
const ARTICLE_LOOKBACK_DAYS: i64 = 7;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("👀 Deriving watchlist for {target_date}...");

    let ops = &ctx.stores.ops;
    let research = &ctx.stores.research;

    let mut sources: BTreeMap<String, Vec<&'static str>> = BTreeMap::new();

    for ticker in market_queries::distinct_held_tickers(ops).await? {
        sources.entry(normalize(&ticker)).or_default().push("holdings");
    }

    let congress_since = target_date - Duration::days(CONGRESS_LOOKBACK_DAYS);
    for ticker in market_queries::congress_tickers_since(ops, congress_since).await? {
        sources.entry(normalize(&ticker)).or_default().push("congress");
    }

    let article_since = target_date - Duration::days(ARTICLE_LOOKBACK_DAYS);
    for ticker in article_queries::tickers_mentioned_since(research, article_since).await? {
        sources.entry(normalize(&ticker)).or_default().push("news");
    }

    for ticker in social_queries::tickers_with_extreme_sentiment(research, article_since).await? {
        sources.entry(normalize(&ticker)).or_default().push("sentiment");
    }

    sources.retain(|ticker, _| !ticker.is_empty());

    let mut upserted = 0;
    let mut errors = 0;

    for (ticker, source_names) in &sources {
        let source_count = source_names.len() as i32;
        let tier = PriorityTier::from_source_count(source_count);
        let source = source_names.join(",");

        match watchlist_queries::upsert_watched_ticker(ops, ticker, tier, &source, source_count)
            .await
        {
            Ok(()) => upserted += 1,
            Err(e) => {
                warn!("❌ Failed to upsert watched ticker {ticker}: {e}");
                errors += 1;
            }
        }
    }

    let active: Vec<String> = sources.keys().cloned().collect();
    let deactivated = watchlist_queries::deactivate_absent(ops, &active).await?;

    let message = format!(
        "found {}; new {}; duplicates 0; skipped {}; errors {}",
        sources.len(),
        upserted,
        deactivated,
        errors
    );
    info!("Watchlist update: {message}");

    Ok(JobOutcome {
        processed: upserted,
        failed: errors,
        tickers: active,
        message,
    })
}

fn normalize(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}
