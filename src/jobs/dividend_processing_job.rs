//! Dividend ingestion for held tickers over a short lookback window.

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::db::market_queries;
use crate::errors::AppError;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const LOOKBACK_DAYS: i64 = 7;
const HISTORY_DAYS: u32 = 30;
const INTER_TICKER_DELAY_MS: u64 = 500;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("💵 Processing dividends for {target_date}...");

    let tickers = market_queries::distinct_held_tickers(&ctx.stores.ops).await?;
    if tickers.is_empty() {
        return Ok(JobOutcome {
            message: "no held tickers".into(),
            ..Default::default()
        });
    }

    let window_start = target_date - Duration::days(LOOKBACK_DAYS);
    let mut report = PipelineReport::default();
    let mut failed = 0;

    for ticker in &tickers {
        if ctx.is_cancelled() {
            break;
        }

        let dividends = match ctx.provider.fetch_dividends(ticker, HISTORY_DAYS).await {
            Ok(d) => d,
            Err(e) => {
                warn!("❌ Failed to fetch dividends for {ticker}: {e}");
                report.errors += 1;
                failed += 1;
                continue;
            }
        };

        for dividend in dividends
            .iter()
            .filter(|d| d.ex_date >= window_start && d.ex_date <= target_date)
        {
            report.found += 1;
            match market_queries::upsert_dividend(
                &ctx.stores.ops,
                ticker,
                dividend.ex_date,
                None,
                &dividend.amount_per_share,
                "USD",
            )
            .await
            {
                Ok(true) => {
                    report.new += 1;
                    report.record_ticker(ticker);
                }
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!("❌ Failed to upsert dividend for {ticker}: {e}");
                    report.errors += 1;
                }
            }
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(INTER_TICKER_DELAY_MS)).await;
    }

    let message = report.message();
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed,
        tickers: report.tickers,
        message,
    })
}
