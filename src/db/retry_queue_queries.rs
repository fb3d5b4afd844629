use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::models::{FailureReason, RetryQueueEntry, MAX_RETRIES, MAX_RETRY_AGE_DAYS};

/// Enqueue a retry unless a live (pending|retrying) row already holds the
/// key. Returns true when a new row was created.
pub async fn add_to_retry_queue(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    entity_type: &str,
    failure_reason: FailureReason,
    error_message: &str,
) -> Result<bool, sqlx::Error> {
    // Stored messages are capped the way the dashboard expects
    let truncated: String = error_message.chars().take(200).collect();
    let result = sqlx::query(
        r#"
        INSERT INTO job_retry_queue
            (job_name, target_date, entity_id, entity_type, status, retry_count,
             max_retries, failure_reason, error_message, created_at)
        SELECT $1, $2, $3, $4, 'pending', 0, $5, $6, $7, NOW()
        WHERE NOT EXISTS (
            SELECT 1 FROM job_retry_queue
            WHERE job_name = $1 AND target_date = $2
              AND COALESCE(entity_id, '') = COALESCE($3, '')
              AND entity_type = $4
              AND status IN ('pending', 'retrying')
        )
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .bind(entity_type)
    .bind(MAX_RETRIES)
    .bind(failure_reason)
    .bind(truncated)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Pending entries eligible for processing: retry headroom left and not
/// older than the age cap. Oldest first, bounded by the batch limit.
pub async fn get_pending(
    pool: &PgPool,
    batch_limit: i64,
) -> Result<Vec<RetryQueueEntry>, sqlx::Error> {
    let age_floor = Utc::now() - Duration::days(MAX_RETRY_AGE_DAYS);
    sqlx::query_as::<_, RetryQueueEntry>(
        r#"
        SELECT id, job_name, target_date, entity_id, entity_type, status,
               retry_count, max_retries, failure_reason, error_message,
               created_at, last_attempt_at
        FROM job_retry_queue
        WHERE status = 'pending' AND retry_count < max_retries AND created_at >= $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(age_floor)
    .bind(batch_limit)
    .fetch_all(pool)
    .await
}

/// CAS lease: pending → retrying with the retry counter incremented, in one
/// statement. Row-level locking guarantees a single winner; the losers see
/// zero rows updated.
pub async fn lease(pool: &PgPool, id: i64) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE job_retry_queue
        SET status = 'retrying', retry_count = retry_count + 1, last_attempt_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING retry_count
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("retry_count")))
}

pub async fn mark_resolved(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE job_retry_queue SET status = 'resolved' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Failed attempt with headroom left: back to pending for the next
/// watchdog cycle (the implicit backoff).
pub async fn reset_pending(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE job_retry_queue SET status = 'pending' WHERE id = $1 AND status = 'retrying'")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_abandoned(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE job_retry_queue SET status = 'abandoned' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Age out live entries older than the cap: the source data is likely gone.
/// Returns the number abandoned.
pub async fn abandon_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let age_floor = Utc::now() - Duration::days(MAX_RETRY_AGE_DAYS);
    let result = sqlx::query(
        r#"
        UPDATE job_retry_queue
        SET status = 'abandoned'
        WHERE status IN ('pending', 'retrying') AND created_at < $1
        "#,
    )
    .bind(age_floor)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Purge terminal rows older than the retention window.
pub async fn purge_terminal(pool: &PgPool, older_than_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(older_than_days);
    let result = sqlx::query(
        r#"
        DELETE FROM job_retry_queue
        WHERE status IN ('resolved', 'abandoned') AND created_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn find_entry(
    pool: &PgPool,
    job_name: &str,
    target_date: NaiveDate,
    entity_id: Option<&str>,
    entity_type: &str,
) -> Result<Option<RetryQueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, RetryQueueEntry>(
        r#"
        SELECT id, job_name, target_date, entity_id, entity_type, status,
               retry_count, max_retries, failure_reason, error_message,
               created_at, last_attempt_at
        FROM job_retry_queue
        WHERE job_name = $1 AND target_date = $2
          AND COALESCE(entity_id, '') = COALESCE($3, '')
          AND entity_type = $4
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(job_name)
    .bind(target_date)
    .bind(entity_id)
    .bind(entity_type)
    .fetch_optional(pool)
    .await
}
