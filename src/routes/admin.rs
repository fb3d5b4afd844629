//! Administrative endpoints. These are the login-like routes: every call
//! passes the fixed-window limiter keyed by (client IP, route) before
//! doing anything.

use axum::{
    extract::{ConnectInfo, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;

use crate::errors::AppError;
use crate::services::rate_limiter::LimitOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cache/bump", post(bump_cache))
        .route("/cache/purge", post(purge_cache))
}

#[derive(Serialize)]
struct CacheBumpResponse {
    epoch: u64,
}

/// POST /api/admin/cache/bump - invalidate every derived cache view
async fn bump_cache(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<CacheBumpResponse>, AppError> {
    check_limit(&state, addr, "/api/admin/cache/bump")?;
    let epoch = state.cache.bump_cache_version();
    Ok(Json(CacheBumpResponse { epoch }))
}

/// POST /api/admin/cache/purge - drop expired entries now
async fn purge_cache(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<CacheBumpResponse>, AppError> {
    check_limit(&state, addr, "/api/admin/cache/purge")?;
    state.cache.purge_expired();
    Ok(Json(CacheBumpResponse {
        epoch: state.cache.epoch(),
    }))
}

fn check_limit(state: &AppState, addr: SocketAddr, route: &str) -> Result<(), AppError> {
    match state.limiter.check(&addr.ip().to_string(), route) {
        LimitOutcome::Allowed => Ok(()),
        LimitOutcome::Rejected => Err(AppError::RateLimited),
    }
}
