//! Execution tracking: the thin layer between job code and the execution
//! log. Tracking is best-effort — a failed tracking write never stops a job
//! — but a duplicate-run refusal is authoritative.

use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::warn;

use crate::db::job_execution_queries::{self, StartOutcome};
use crate::errors::AppError;

/// Claim the run key. `Err(AppError::DuplicateRun)` means another live
/// instance holds (job_name, target_date, entity_id); callers abort
/// silently. `Ok(None)` means tracking is unavailable — the job proceeds
/// untracked.
pub async fn mark_started(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
) -> Result<Option<i64>, AppError> {
    match job_execution_queries::insert_running(pool, job_name, target_date, entity_id).await {
        Ok(StartOutcome::Started(id)) => Ok(Some(id)),
        Ok(StartOutcome::Duplicate) => Err(AppError::DuplicateRun {
            job_name: job_name.to_string(),
            target_date: target_date.to_string(),
        }),
        Err(e) => {
            warn!("Could not mark job started for {job_name}: {e}");
            Ok(None)
        }
    }
}

pub async fn mark_completed(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    tickers_processed: &[String],
    duration_ms: i64,
) {
    if let Err(e) = job_execution_queries::mark_completed(
        pool,
        job_name,
        target_date,
        entity_id,
        tickers_processed,
        duration_ms,
    )
    .await
    {
        warn!("Could not mark job completed for {job_name}: {e}");
    }
}

pub async fn mark_failed(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    error_message: &str,
    duration_ms: i64,
) {
    if let Err(e) = job_execution_queries::mark_failed(
        pool,
        job_name,
        target_date,
        entity_id,
        error_message,
        duration_ms,
    )
    .await
    {
        warn!("Could not mark job failed for {job_name}: {e}");
    }
}

/// Append-only structured log for jobs without a natural target date.
pub async fn log_execution(
    pool: &PgPool,
    job_name: &str,
    success: bool,
    message: &str,
    duration_ms: i64,
) {
    if let Err(e) =
        job_execution_queries::log_execution(pool, job_name, success, message, duration_ms).await
    {
        warn!("Could not write scheduler log for {job_name}: {e}");
    }
}
