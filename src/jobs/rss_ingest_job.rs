//! Feed ingestion: pull the configured RSS/Atom feeds, junk-filter, and
//! upsert articles by URL with no analysis yet. The research-ingest job
//! fills summaries in later, so an analyzer outage never costs articles.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::article_queries;
use crate::errors::AppError;
use crate::models::ArticleAnalysis;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const DEFAULT_FEEDS: [&str; 3] = [
    "https://feeds.content.dowjones.io/public/rss/mw_topstories",
    "https://www.cnbc.com/id/100003114/device/rss/rss.html",
    "https://seekingalpha.example/market_currents.xml",
];

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    let feeds = configured_feeds();
    info!("📰 Ingesting {} RSS feeds for {target_date}...", feeds.len());

    let mut report = PipelineReport::default();

    for feed_url in &feeds {
        if ctx.is_cancelled() {
            break;
        }
        ctx.pipeline.polite(feed_url).await;

        let result = ctx.rss.fetch_feed(feed_url).await;
        report.skipped += result.junk_filtered as i32;

        for item in result.items {
            report.found += 1;

            match article_queries::exists_by_url(&ctx.stores.research, &item.url).await {
                Ok(true) => {
                    report.duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Duplicate check failed for {} (upsert will handle): {e}", item.url);
                }
            }

            // Analysis comes later; tickers from the feed itself are kept
            let analysis = ArticleAnalysis {
                tickers: item.tickers.clone().unwrap_or_default(),
                ..Default::default()
            };

            match article_queries::upsert_article(
                &ctx.stores.research,
                &item.url,
                &item.title,
                &item.source,
                item.published_at,
                &item.content,
                &analysis,
            )
            .await
            {
                Ok(true) => {
                    report.new += 1;
                    for ticker in analysis.tickers.iter() {
                        report.record_ticker(ticker);
                    }
                }
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!("❌ Failed to upsert article {}: {e}", item.url);
                    report.errors += 1;
                }
            }
        }
    }

    let message = report.message();
    info!("RSS ingest: {message}");
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}

fn configured_feeds() -> Vec<String> {
    match std::env::var("RSS_FEEDS") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => DEFAULT_FEEDS.iter().map(|f| f.to_string()).collect(),
    }
}
