use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MAX_RETRIES: i32 = 3;
pub const MAX_RETRY_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RetryStatus {
    Pending,
    Retrying,
    Resolved,
    Abandoned,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::Retrying => "retrying",
            RetryStatus::Resolved => "resolved",
            RetryStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ContainerRestart,
    JobFailed,
    ValidationFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ContainerRestart => "container_restart",
            FailureReason::JobFailed => "job_failed",
            FailureReason::ValidationFailed => "validation_failed",
        }
    }
}

/// Durable retry-queue row, keyed by (job_name, target_date, entity_id,
/// entity_type). The watchdog creates rows; the retry processor drives the
/// state machine: pending → retrying → resolved | pending (count++) |
/// abandoned once retry_count reaches MAX_RETRIES.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RetryQueueEntry {
    pub id: i64,
    pub job_name: String,
    pub target_date: NaiveDate,
    pub entity_id: Option<String>,
    pub entity_type: String,
    pub status: RetryStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub failure_reason: FailureReason,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryQueueEntry {
    /// Invariant J2: a live entry always has headroom left.
    pub fn is_live(&self) -> bool {
        matches!(self.status, RetryStatus::Pending | RetryStatus::Retrying)
            && self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_requires_headroom() {
        let mut entry = RetryQueueEntry {
            id: 1,
            job_name: "performance_metrics".into(),
            target_date: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            entity_id: None,
            entity_type: "all_funds".into(),
            status: RetryStatus::Pending,
            retry_count: 0,
            max_retries: MAX_RETRIES,
            failure_reason: FailureReason::JobFailed,
            error_message: None,
            created_at: Utc::now(),
            last_attempt_at: None,
        };
        assert!(entry.is_live());

        entry.retry_count = MAX_RETRIES;
        assert!(!entry.is_live());

        entry.retry_count = 1;
        entry.status = RetryStatus::Abandoned;
        assert!(!entry.is_live());
    }
}
