//! Daily per-ticker digest: combine recent articles and the latest social
//! metric into one corpus and let the LLM write the day's summary. Tier A
//! tickers go first; a ticker already analyzed today is skipped.

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{article_queries, social_queries, watchlist_queries};
use crate::errors::AppError;
use crate::models::TickerAnalysis;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const ARTICLE_LOOKBACK_DAYS: i64 = 7;
const ARTICLES_PER_TICKER: i64 = 10;
const MAX_TICKERS_PER_RUN: usize = 25;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("🧠 Running ticker analysis for {target_date}...");

    let model = ctx.llm.default_model().to_string();
    let watched = watchlist_queries::active_by_tier(&ctx.stores.ops).await?;

    let mut report = PipelineReport::default();

    for entry in watched.iter().take(MAX_TICKERS_PER_RUN) {
        if ctx.is_cancelled() {
            break;
        }
        let ticker = &entry.ticker;
        report.found += 1;

        let previous = watchlist_queries::latest_analysis(&ctx.stores.ops, ticker).await?;
        if previous.as_ref().map(|a| a.as_of >= target_date).unwrap_or(false) {
            report.duplicates += 1;
            continue;
        }

        let articles = article_queries::recent_for_ticker(
            &ctx.stores.research,
            ticker,
            ARTICLE_LOOKBACK_DAYS,
            ARTICLES_PER_TICKER,
        )
        .await?;
        let metric = social_queries::latest_metric_for(&ctx.stores.research, ticker).await?;
        let social_volume = social_queries::post_volume_for_ticker(
            &ctx.stores.research,
            ticker,
            ARTICLE_LOOKBACK_DAYS,
        )
        .await? as i32;

        if articles.is_empty() && metric.is_none() {
            report.skipped += 1;
            continue;
        }

        let mut corpus = String::new();
        if let Some(prev) = &previous {
            corpus.push_str(&format!(
                "Previous digest ({}): {}\n\n",
                prev.as_of, prev.summary
            ));
        }
        for article in &articles {
            corpus.push_str(&format!(
                "[{}] {}\n{}\n\n",
                article.source,
                article.title,
                article.summary.as_deref().unwrap_or(&article.content)
            ));
        }
        if let Some(m) = &metric {
            corpus.push_str(&format!(
                "Crowd sentiment on {}: {:?} (score {:.2}, volume {})\n",
                m.platform, m.sentiment_label, m.sentiment_score, m.volume
            ));
        }
        let posts = social_queries::recent_posts_for_ticker(
            &ctx.stores.research,
            ticker,
            ARTICLE_LOOKBACK_DAYS,
            5,
        )
        .await?;
        for post in &posts {
            corpus.push_str(&format!("Post by {}: {}\n", post.author, post.content));
        }

        let Some(summary) = ctx.pipeline.analyze_text(&model, &corpus).await else {
            // Non-deterministic job: no retry queue, just try again tomorrow
            report.skipped += 1;
            continue;
        };

        let analysis = TickerAnalysis {
            id: Uuid::new_v4(),
            ticker: ticker.clone(),
            as_of: target_date,
            summary: summary.summary.clone(),
            sentiment: Some(summary.sentiment.clone()).filter(|s| !s.is_empty()),
            sentiment_score: Some(summary.sentiment_score),
            article_count: articles.len() as i32,
            social_volume,
            created_at: chrono::Utc::now(),
        };

        match watchlist_queries::insert_ticker_analysis(&ctx.stores.ops, &analysis).await {
            Ok(true) => {
                report.new += 1;
                report.record_ticker(ticker);
            }
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to store analysis for {ticker}: {e}");
                report.errors += 1;
            }
        }
    }

    let message = report.message();
    info!("Ticker analysis: {message}");
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}
