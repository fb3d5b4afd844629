use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::models::{JobExecution, JobStatus, SchedulerHeartbeat};

/// A `running` row older than this is presumed dead (stale-running).
pub const STALE_THRESHOLD_HOURS: i64 = 1;

/// Outcome of `insert_running`: either a fresh tracking row or a refusal
/// because a live row already holds the key.
#[derive(Debug)]
pub enum StartOutcome {
    Started(i64),
    Duplicate,
}

/// Claim the (job_name, target_date, entity_id) key. Enforced by the
/// partial unique index over running rows; a stale holder is failed first
/// so the key frees up (invariant J1 allows no other reading).
pub async fn insert_running(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
) -> Result<StartOutcome, sqlx::Error> {
    let existing = sqlx::query(
        r#"
        SELECT id, started_at FROM job_executions
        WHERE job_name = $1 AND target_date = $2
          AND COALESCE(entity_id, '') = COALESCE($3, '')
          AND status = 'running'
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        let started_at: DateTime<Utc> = row.get("started_at");
        let stale_cutoff = Utc::now() - Duration::hours(STALE_THRESHOLD_HOURS);
        if started_at > stale_cutoff {
            return Ok(StartOutcome::Duplicate);
        }
        // Stale holder: release the key so the new run can claim it
        let stale_id: i64 = row.get("id");
        warn!(
            "Releasing stale running row {} for {} {}",
            stale_id, job_name, target_date
        );
        sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'failed', completed_at = NOW(),
                message = 'Stale running row superseded by new run'
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(stale_id)
        .execute(pool)
        .await?;
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO job_executions (job_name, target_date, entity_id, started_at, status, tickers_processed)
        VALUES ($1, $2, $3, NOW(), 'running', '{}')
        ON CONFLICT (job_name, target_date, COALESCE(entity_id, '')) WHERE status = 'running'
        DO NOTHING
        RETURNING id
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(row) => Ok(StartOutcome::Started(row.get("id"))),
        // Lost the race to a concurrent starter
        None => Ok(StartOutcome::Duplicate),
    }
}

pub async fn mark_completed(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    tickers_processed: &[String],
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE job_executions
        SET status = 'completed', completed_at = NOW(),
            tickers_processed = $4, duration_ms = $5
        WHERE job_name = $1 AND target_date = $2
          AND COALESCE(entity_id, '') = COALESCE($3, '')
          AND status = 'running'
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .bind(tickers_processed)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    error_message: &str,
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE job_executions
        SET status = 'failed', completed_at = NOW(),
            message = $4, duration_ms = $5
        WHERE job_name = $1 AND target_date = $2
          AND COALESCE(entity_id, '') = COALESCE($3, '')
          AND status = 'running'
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .bind(error_message)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Running rows older than the cutoff: candidates for stale detection.
pub async fn find_stale_running(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(
        r#"
        SELECT id, job_name, target_date, entity_id, started_at, completed_at,
               status, message, duration_ms, tickers_processed
        FROM job_executions
        WHERE status = 'running' AND started_at < $1
        ORDER BY started_at ASC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

/// Watchdog-only transition running → failed for a stale row.
pub async fn fail_stale(
    pool: &PgPool,
    id: i64,
    message: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE job_executions
        SET status = 'failed', completed_at = NOW(), message = $2
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Failed rows completed after the cutoff (recent-failure sweep input).
pub async fn find_recent_failed(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(
        r#"
        SELECT id, job_name, target_date, entity_id, started_at, completed_at,
               status, message, duration_ms, tickers_processed
        FROM job_executions
        WHERE status = 'failed' AND completed_at > $1
        ORDER BY completed_at DESC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

pub async fn is_completed(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT 1 AS one FROM job_executions
        WHERE job_name = $1 AND target_date = $2 AND status = 'completed'
        LIMIT 1
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Append to the structured scheduler log, independent of the tracking
/// table. Used by jobs without a natural target date.
pub async fn log_execution(
    pool: &PgPool,
    job_name: &str,
    success: bool,
    message: &str,
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO scheduler_logs (job_name, success, message, duration_ms, logged_at)
        VALUES ($1, $2, $3, $4, NOW())
        "#,
    )
    .bind(job_name)
    .bind(success)
    .bind(message)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_scheduler_logs(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<crate::models::SchedulerLog>, sqlx::Error> {
    sqlx::query_as::<_, crate::models::SchedulerLog>(
        r#"
        SELECT id, job_name, success, message, duration_ms, logged_at
        FROM scheduler_logs
        ORDER BY logged_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn upsert_heartbeat(
    pool: &PgPool,
    process_id: &str,
    generation: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO scheduler_heartbeats (process_id, last_heartbeat_at, generation)
        VALUES ($1, NOW(), $2)
        ON CONFLICT (process_id)
        DO UPDATE SET last_heartbeat_at = NOW(), generation = EXCLUDED.generation
        "#,
    )
    .bind(process_id)
    .bind(generation)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn latest_heartbeat(
    pool: &PgPool,
) -> Result<Option<SchedulerHeartbeat>, sqlx::Error> {
    sqlx::query_as::<_, SchedulerHeartbeat>(
        r#"
        SELECT process_id, last_heartbeat_at, generation
        FROM scheduler_heartbeats
        ORDER BY last_heartbeat_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

pub async fn recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(
        r#"
        SELECT id, job_name, target_date, entity_id, started_at, completed_at,
               status, message, duration_ms, tickers_processed
        FROM job_executions
        ORDER BY started_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn job_history(
    pool: &PgPool,
    job_name: &str,
    limit: i64,
) -> Result<Vec<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(
        r#"
        SELECT id, job_name, target_date, entity_id, started_at, completed_at,
               status, message, duration_ms, tickers_processed
        FROM job_executions
        WHERE job_name = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(job_name)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[derive(Debug, serde::Serialize)]
pub struct JobStats {
    pub job_name: String,
    pub total_runs: i64,
    pub completed_runs: i64,
    pub failed_runs: i64,
    pub avg_duration_ms: Option<f64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
}

pub async fn job_stats(pool: &PgPool, job_name: &str) -> Result<JobStats, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_runs,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed_runs,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed_runs,
            AVG(duration_ms)::FLOAT8 AS avg_duration_ms,
            MAX(started_at) AS last_run
        FROM job_executions
        WHERE job_name = $1
        "#,
    )
    .bind(job_name)
    .fetch_one(pool)
    .await?;

    let last_status = sqlx::query(
        r#"
        SELECT status FROM job_executions
        WHERE job_name = $1
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(job_name)
    .fetch_optional(pool)
    .await?
    .map(|r| r.get::<JobStatus, _>("status"));

    Ok(JobStats {
        job_name: job_name.to_string(),
        total_runs: row.get("total_runs"),
        completed_runs: row.get("completed_runs"),
        failed_runs: row.get("failed_runs"),
        avg_duration_ms: row.get("avg_duration_ms"),
        last_run: row.get("last_run"),
        last_status,
    })
}
