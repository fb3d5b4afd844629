//! Retry-queue processor: drains leased entries and drives the state
//! machine pending → retrying → resolved | pending | abandoned. The next
//! watchdog cycle is the implicit backoff; nothing here sleeps.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{execute_for_date, Handler, JobContext};
use crate::db::retry_queue_queries;
use crate::errors::AppError;
use crate::jobs;
use crate::models::RetryQueueEntry;

/// Entries drained per watchdog cycle.
pub const BATCH_LIMIT: i64 = 10;

/// Routes retry entries to the calculation-job handlers. Only jobs whose
/// output is deterministic for a target date are registered.
pub struct RetryProcessor {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for RetryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryProcessor {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();

        handlers.insert(
            jobs::UPDATE_PORTFOLIO_PRICES,
            Arc::new(|ctx, date| {
                Box::pin(async move { jobs::update_portfolio_prices_job::run(&ctx, date).await })
            }),
        );
        handlers.insert(
            jobs::PERFORMANCE_METRICS,
            Arc::new(|ctx, date| {
                Box::pin(async move { jobs::performance_metrics_job::run(&ctx, date).await })
            }),
        );
        handlers.insert(
            jobs::DIVIDEND_PROCESSING,
            Arc::new(|ctx, date| {
                Box::pin(async move { jobs::dividend_processing_job::run(&ctx, date).await })
            }),
        );
        handlers.insert(
            jobs::BENCHMARK_REFRESH,
            Arc::new(|ctx, date| {
                Box::pin(async move { jobs::benchmark_refresh_job::run(&ctx, date).await })
            }),
        );
        handlers.insert(
            jobs::EXCHANGE_RATES,
            Arc::new(|ctx, date| {
                Box::pin(async move { jobs::exchange_rates_job::run(&ctx, date).await })
            }),
        );

        Self { handlers }
    }

    /// Drain up to the batch limit. Returns (resolved, failed, abandoned).
    pub async fn process(&self, ctx: &JobContext) -> Result<(i32, i32, i32), AppError> {
        let pool = &ctx.stores.ops;

        let aged_out = retry_queue_queries::abandon_expired(pool).await?;
        if aged_out > 0 {
            warn!("Abandoned {aged_out} retry entries older than the age cap");
        }

        let pending = retry_queue_queries::get_pending(pool, BATCH_LIMIT).await?;
        if pending.is_empty() {
            return Ok((0, 0, 0));
        }

        info!("Processing {} pending retry(ies)...", pending.len());

        let mut resolved = 0;
        let mut failed = 0;
        let mut abandoned = 0;

        for entry in pending {
            if ctx.is_cancelled() {
                break;
            }
            match self.process_entry(ctx, &entry).await {
                EntryOutcome::Resolved => resolved += 1,
                EntryOutcome::BackToPending => failed += 1,
                EntryOutcome::Abandoned => abandoned += 1,
                EntryOutcome::Skipped => {}
            }
        }

        Ok((resolved, failed, abandoned))
    }

    async fn process_entry(&self, ctx: &JobContext, entry: &RetryQueueEntry) -> EntryOutcome {
        let pool = &ctx.stores.ops;
        let job_name = entry.job_name.as_str();

        let Some((registered_name, handler)) = self.handlers.get_key_value(job_name) else {
            warn!("  ⚠️  No retry handler for job type: {job_name}");
            return EntryOutcome::Skipped;
        };

        // CAS lease: only one worker wins the pending → retrying transition
        let retry_count = match retry_queue_queries::lease(pool, entry.id).await {
            Ok(Some(count)) => count,
            Ok(None) => return EntryOutcome::Skipped,
            Err(e) => {
                error!("  ❌ Failed to lease retry {}: {e}", entry.id);
                return EntryOutcome::Skipped;
            }
        };

        let result = execute_for_date(
            *registered_name,
            entry.target_date,
            ctx.clone(),
            handler.clone(),
        )
        .await;

        match result {
            Ok(_) => {
                if let Err(e) = retry_queue_queries::mark_resolved(pool, entry.id).await {
                    error!("  ❌ Failed to mark retry {} resolved: {e}", entry.id);
                }
                info!("  ✅ Retry succeeded for {} {}", job_name, entry.target_date);
                EntryOutcome::Resolved
            }
            Err(e) => {
                if retry_count >= entry.max_retries {
                    if let Err(db_err) = retry_queue_queries::mark_abandoned(pool, entry.id).await {
                        error!("  ❌ Failed to abandon retry {}: {db_err}", entry.id);
                    }
                    error!(
                        "  ❌ Abandoned {} {} after {} retries: {e}",
                        job_name, entry.target_date, retry_count
                    );
                    EntryOutcome::Abandoned
                } else {
                    if let Err(db_err) = retry_queue_queries::reset_pending(pool, entry.id).await {
                        error!("  ❌ Failed to reset retry {}: {db_err}", entry.id);
                    }
                    warn!(
                        "  ⚠️  Retry failed for {} {} (attempt {}/{}): {e}",
                        job_name, entry.target_date, retry_count, entry.max_retries
                    );
                    EntryOutcome::BackToPending
                }
            }
        }
    }
}

enum EntryOutcome {
    Resolved,
    BackToPending,
    Abandoned,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::CALCULATION_JOBS;

    #[test]
    fn test_every_calculation_job_has_a_handler() {
        let processor = RetryProcessor::new();
        for job in CALCULATION_JOBS {
            assert!(
                processor.handlers.contains_key(job),
                "missing retry handler for {job}"
            );
        }
    }

    #[test]
    fn test_non_calculation_jobs_are_unroutable() {
        let processor = RetryProcessor::new();
        assert!(!processor.handlers.contains_key("rss_ingest"));
        assert!(!processor.handlers.contains_key("social_sentiment"));
    }
}
