//! Research analysis pass: run the chain-of-thought summarizer over
//! articles that still have no summary, then attach embeddings. Analyzer
//! failures leave the article untouched for a future pass.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::article_queries;
use crate::errors::AppError;
use crate::pipeline::{analysis_from_summary, PipelineReport};
use crate::scheduler::{JobContext, JobOutcome};

const BATCH_SIZE: i64 = 20;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("🔬 Analyzing unprocessed research articles for {target_date}...");

    let model = ctx.llm.default_model().to_string();
    let pool = &ctx.stores.research;

    let articles = article_queries::find_unanalyzed(pool, BATCH_SIZE).await?;
    if articles.is_empty() {
        return Ok(JobOutcome {
            message: "no unanalyzed articles".into(),
            ..Default::default()
        });
    }

    let mut report = PipelineReport::default();
    report.found = articles.len() as i32;

    for article in &articles {
        if ctx.is_cancelled() {
            break;
        }

        let summary = ctx.pipeline.analyze_text(&model, &article.content).await;
        if summary.is_none() {
            // No summary is a recoverable no-op; the next pass retries
            report.skipped += 1;
            continue;
        }

        let analysis = analysis_from_summary(summary.as_ref());
        match article_queries::update_analysis(pool, &article.url, &analysis).await {
            Ok(()) => {
                report.new += 1;
                for ticker in &analysis.tickers {
                    report.record_ticker(ticker);
                }
            }
            Err(e) => {
                warn!("❌ Failed to store analysis for {}: {e}", article.url);
                report.errors += 1;
                continue;
            }
        }

        let embedding = ctx.pipeline.embed_text(&article.content).await;
        if !embedding.is_empty() {
            if let Err(e) =
                article_queries::update_embedding(pool, &article.url, &embedding).await
            {
                warn!("Failed to store embedding for {}: {e}", article.url);
            }
        }
    }

    let message = report.message();
    info!("Research ingest: {message}");
    Ok(JobOutcome {
        processed: report.new,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}
