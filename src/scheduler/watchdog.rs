//! Retry watchdog: catches jobs that died with the container, failed
//! recently, or completed without producing data, and feeds the retry
//! queue. Four protocols run in order every cycle; validation runs last so
//! it observes what the earlier steps enqueued.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::retry::RetryProcessor;
use super::JobContext;
use crate::db::job_execution_queries::{self, STALE_THRESHOLD_HOURS};
use crate::db::{market_queries, retry_queue_queries};
use crate::errors::AppError;
use crate::jobs::{self, is_calculation_job};
use crate::models::FailureReason;

/// Trading days verified by the data-validation protocol.
const VALIDATION_LOOKBACK_DAYS: usize = 7;
/// Failed runs younger than this are swept for retry.
const FAILURE_SWEEP_HOURS: i64 = 24;

/// One watchdog cycle. Returns the structured summary line that goes into
/// the scheduler log.
pub async fn run(ctx: &JobContext) -> Result<String, AppError> {
    info!("🔍 Starting watchdog check...");

    let stale = detect_stale_running(ctx).await?;
    let swept = detect_recent_failures(ctx).await?;
    let (resolved, failed, abandoned) = RetryProcessor::new().process(ctx).await?;
    let validation_failures = validate_completed_jobs(ctx).await?;

    // Terminal rows are kept a month for the dashboard, then purged
    let purged = retry_queue_queries::purge_terminal(&ctx.stores.ops, 30).await?;
    if purged > 0 {
        info!("Purged {purged} terminal retry entries");
    }

    let message = format!(
        "stale {stale}; swept {swept}; retries resolved {resolved} failed {failed} abandoned {abandoned}; validation {validation_failures}"
    );
    info!("✅ Watchdog check complete: {message}");
    Ok(message)
}

/// Protocol 1: running rows older than the stale threshold are presumed
/// dead (invariant J1 leaves no other reading). They transition to failed
/// here — the only writer besides the owning worker — and calculation jobs
/// are queued for retry. No age cap: a week-old stale row is still handled.
async fn detect_stale_running(ctx: &JobContext) -> Result<i32, AppError> {
    let pool = &ctx.stores.ops;
    let cutoff = Utc::now() - Duration::hours(STALE_THRESHOLD_HOURS);

    let stale = job_execution_queries::find_stale_running(pool, cutoff).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    warn!("Found {} stale running job(s)", stale.len());
    let mut handled = 0;

    for run in stale {
        let ran_for = Utc::now() - run.started_at;
        let message = format!(
            "Container restarted - job interrupted (ran for {} minutes)",
            ran_for.num_minutes()
        );

        if !job_execution_queries::fail_stale(pool, run.id, &message).await? {
            // Lost a race with the owning worker finishing; leave it alone
            continue;
        }
        handled += 1;

        if is_calculation_job(&run.job_name) {
            let added = retry_queue_queries::add_to_retry_queue(
                pool,
                &run.job_name,
                run.target_date,
                run.entity_id.as_deref(),
                entity_type_for(run.entity_id.as_deref()),
                FailureReason::ContainerRestart,
                "Job interrupted by container restart",
            )
            .await?;
            if added {
                info!("  📝 Added {} {} to retry queue", run.job_name, run.target_date);
            }
        }
    }

    Ok(handled)
}

/// Protocol 2: failed calculation jobs from the last 24 hours get a retry
/// entry unless one is already live for the key.
async fn detect_recent_failures(ctx: &JobContext) -> Result<i32, AppError> {
    let pool = &ctx.stores.ops;
    let cutoff = Utc::now() - Duration::hours(FAILURE_SWEEP_HOURS);

    let failed = job_execution_queries::find_recent_failed(pool, cutoff).await?;
    let mut enqueued = 0;

    for run in failed {
        if !is_calculation_job(&run.job_name) {
            continue;
        }

        let existing = retry_queue_queries::find_entry(
            pool,
            &run.job_name,
            run.target_date,
            run.entity_id.as_deref(),
            entity_type_for(run.entity_id.as_deref()),
        )
        .await?;
        if existing.map(|e| e.is_live()).unwrap_or(false) {
            continue;
        }

        let added = retry_queue_queries::add_to_retry_queue(
            pool,
            &run.job_name,
            run.target_date,
            run.entity_id.as_deref(),
            entity_type_for(run.entity_id.as_deref()),
            FailureReason::JobFailed,
            run.message.as_deref().unwrap_or("Job failed"),
        )
        .await?;
        if added {
            enqueued += 1;
            info!("  📝 Added {} {} to retry queue", run.job_name, run.target_date);
        }
    }

    Ok(enqueued)
}

/// Protocol 4: a completed run must have produced downstream rows. For
/// every recent trading day where `update_portfolio_prices` reports
/// completed, position rows must exist for the production funds; a
/// completed-but-empty day is queued with a validation failure.
async fn validate_completed_jobs(ctx: &JobContext) -> Result<i32, AppError> {
    let pool = &ctx.stores.ops;

    let today = Utc::now().with_timezone(&ctx.calendar.timezone()).date_naive();
    let recent_days = ctx.calendar.recent_trading_days(today, VALIDATION_LOOKBACK_DAYS);
    if recent_days.is_empty() {
        return Ok(0);
    }

    let funds = market_queries::production_funds(pool).await?;
    if funds.is_empty() {
        return Ok(0);
    }

    info!("Validating {} recent trading days...", recent_days.len());
    let mut enqueued = 0;

    for day in recent_days {
        if !job_execution_queries::is_completed(pool, jobs::UPDATE_PORTFOLIO_PRICES, day).await? {
            continue;
        }

        let rows = market_queries::count_positions_for_date(pool, day, &funds).await?;
        if rows > 0 {
            continue;
        }

        warn!("  ⚠️  {day}: job completed but data missing");
        let added = retry_queue_queries::add_to_retry_queue(
            pool,
            jobs::UPDATE_PORTFOLIO_PRICES,
            day,
            None,
            "all_funds",
            FailureReason::ValidationFailed,
            "Job completed but data missing from database",
        )
        .await?;
        if added {
            enqueued += 1;
            info!("  📝 Added {day} to retry queue (validation failed)");
        }
    }

    Ok(enqueued)
}

fn entity_type_for(entity_id: Option<&str>) -> &'static str {
    if entity_id.is_some() {
        "fund"
    } else {
        "all_funds"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_mapping() {
        assert_eq!(entity_type_for(Some("core-fund")), "fund");
        assert_eq!(entity_type_for(None), "all_funds");
    }
}
