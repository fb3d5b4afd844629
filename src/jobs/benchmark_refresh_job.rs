//! Benchmark series refresh. Rewrites recent daily closes for the tracked
//! indices, then bumps the cache epoch so derived views (relative
//! performance, charts) recompute against the new series.

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::market_queries;
use crate::errors::AppError;
use crate::models::BenchmarkBar;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const BENCHMARKS: [(&str, &str); 3] = [
    ("SP500", "^GSPC"),
    ("TSX", "^GSPTSE"),
    ("NASDAQ", "^IXIC"),
];

const HISTORY_DAYS: u32 = 30;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("📈 Refreshing benchmark series for {target_date}...");

    let mut report = PipelineReport::default();

    for (benchmark, symbol) in BENCHMARKS {
        if ctx.is_cancelled() {
            break;
        }

        let history = match ctx.provider.fetch_daily_history(symbol, HISTORY_DAYS).await {
            Ok(h) => h,
            Err(e) => {
                warn!("❌ Failed to fetch {benchmark} ({symbol}): {e}");
                report.errors += 1;
                continue;
            }
        };

        for point in history.iter().filter(|p| p.date <= target_date) {
            report.found += 1;
            let bar = BenchmarkBar {
                id: Uuid::new_v4(),
                benchmark: benchmark.to_string(),
                date: point.date,
                close: point.close.clone(),
            };
            match market_queries::upsert_benchmark_bar(&ctx.stores.ops, &bar).await {
                Ok(true) => report.new += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!("❌ Failed to upsert {benchmark} {}: {e}", point.date);
                    report.errors += 1;
                }
            }
        }
    }

    if report.new > 0 {
        // Series changed: invalidate every view derived from it
        ctx.cache.bump_cache_version();
    }

    let message = report.message();
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: Vec::new(),
        message,
    })
}
