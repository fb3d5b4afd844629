use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Terminal-state lifecycle of one tracked job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the job execution log.
///
/// Created when a run starts; transitions exactly once to `completed` or
/// `failed` and is never mutated afterwards. The watchdog is the only other
/// writer, and only for rows older than the stale threshold.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobExecution {
    pub id: i64,
    pub job_name: String,
    pub target_date: NaiveDate,
    pub entity_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
    /// Tickers touched by the run, for dashboard drill-down.
    pub tickers_processed: Vec<String>,
}

/// Append-only structured log entry for jobs without a natural target date
/// (the watchdog itself, health probes). Independent of the tracking table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerLog {
    pub id: i64,
    pub job_name: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: i64,
    pub logged_at: DateTime<Utc>,
}

/// Liveness marker refreshed on every scheduler tick. A gap longer than
/// 2× the tick interval at startup means the previous process died with
/// jobs possibly mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerHeartbeat {
    pub process_id: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub generation: i64,
}
