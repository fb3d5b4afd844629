//! Read surface over the execution log. External dashboards consume this;
//! only the scheduler writes.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::db::job_execution_queries::{self, JobStats};
use crate::errors::AppError;
use crate::models::{JobExecution, SchedulerLog};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/recent", get(recent_job_runs))
        .route("/log", get(scheduler_log))
        .route("/:job_name/history", get(job_history))
        .route("/:job_name/stats", get(job_stats))
}

/// GET /api/jobs/recent - the latest runs across all jobs
async fn recent_job_runs(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobExecution>>, AppError> {
    let runs = job_execution_queries::recent_runs(&state.stores.ops, 50).await?;
    Ok(Json(runs))
}

/// GET /api/jobs/log - untracked-job log entries (watchdog and friends)
async fn scheduler_log(
    State(state): State<AppState>,
) -> Result<Json<Vec<SchedulerLog>>, AppError> {
    let entries = job_execution_queries::recent_scheduler_logs(&state.stores.ops, 100).await?;
    Ok(Json(entries))
}

/// GET /api/jobs/:job_name/history
async fn job_history(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<JobExecution>>, AppError> {
    let runs = job_execution_queries::job_history(&state.stores.ops, &job_name, 100).await?;
    Ok(Json(runs))
}

/// GET /api/jobs/:job_name/stats
async fn job_stats(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobStats>, AppError> {
    let stats = job_execution_queries::job_stats(&state.stores.ops, &job_name).await?;
    Ok(Json(stats))
}
