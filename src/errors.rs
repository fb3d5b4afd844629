use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use reqwest::StatusCode;
use sqlx::Error;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Rate limited")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// Another instance of the same (job_name, target_date, entity) is live.
    /// Callers abort silently; this is a refusal, not a failure.
    #[error("Duplicate run for {job_name} {target_date}")]
    DuplicateRun {
        job_name: String,
        target_date: String,
    },
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("Robots.txt disallows {0}")]
    RobotsDisallowed(String),
    #[error("Credential missing: {0}")]
    CredentialMissing(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            AppError::RateLimited => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Too many requests").into_response()
            }
            AppError::DuplicateRun { .. } => {
                (StatusCode::CONFLICT, "Duplicate run").into_response()
            }
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Fetch(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            AppError::Llm(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            AppError::RobotsDisallowed(url) => {
                (StatusCode::FORBIDDEN, format!("robots-disallowed: {url}")).into_response()
            }
            AppError::CredentialMissing(what) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("credential missing: {what}"),
            )
                .into_response(),
            AppError::Db(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: Error) -> Self {
        AppError::Db(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}
