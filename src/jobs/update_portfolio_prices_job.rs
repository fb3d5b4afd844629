//! Daily position valuation: for every open holding, pull the close for
//! the target date and upsert a (fund, ticker, date) position row.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::market_queries;
use crate::errors::AppError;
use crate::models::PortfolioPosition;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const HISTORY_DAYS: u32 = 14;
const INTER_TICKER_DELAY_MS: u64 = 500;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("💰 Updating portfolio prices for {target_date}...");

    let holdings = market_queries::open_holdings(&ctx.stores.ops).await?;
    if holdings.is_empty() {
        return Ok(JobOutcome {
            message: "no open holdings".into(),
            ..Default::default()
        });
    }

    let mut report = PipelineReport::default();
    let mut failed = 0;

    for holding in &holdings {
        if ctx.is_cancelled() {
            warn!("Cancellation requested; stopping after {} holdings", report.found);
            break;
        }
        report.found += 1;

        let close = match close_for_date(ctx, &holding.ticker, target_date).await {
            Ok(Some(close)) => close,
            Ok(None) => {
                warn!("No close for {} on {}", holding.ticker, target_date);
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!("❌ Failed to fetch prices for {}: {}", holding.ticker, e);
                report.errors += 1;
                failed += 1;
                continue;
            }
        };

        let market_value = &holding.shares * &close;
        let position = PortfolioPosition {
            id: Uuid::new_v4(),
            fund: holding.fund.clone(),
            ticker: holding.ticker.clone(),
            date: target_date,
            shares: holding.shares.clone(),
            close_price: close,
            market_value,
            currency: holding.currency.clone(),
        };

        match market_queries::upsert_position(&ctx.stores.ops, &position).await {
            Ok(true) => report.new += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to upsert position for {}: {}", holding.ticker, e);
                report.errors += 1;
                failed += 1;
                continue;
            }
        }
        report.record_ticker(&holding.ticker);

        // Spacing between provider calls to stay under free-tier quotas
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

/// Close for the target date, falling back to the nearest earlier close in
/// the window (source data can lag on thin tickers).
async fn close_for_date(
    ctx: &JobContext,
    ticker: &str,
    target_date: NaiveDate,
) -> Result<Option<BigDecimal>, AppError> {
    let history = ctx
        .provider
        .fetch_daily_history(ticker, HISTORY_DAYS)
        .await
        .map_err(|e| AppError::External(e.to_string()))?;

    Ok(history
        .iter()
        .filter(|p| p.date <= target_date)
        .max_by_key(|p| p.date)
        .map(|p| p.close.clone()))
}
