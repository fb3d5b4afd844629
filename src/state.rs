use std::sync::Arc;

use crate::db::Stores;
use crate::services::cache::CacheLayer;
use crate::services::rate_limiter::FixedWindowLimiter;

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub cache: CacheLayer,
    pub limiter: Arc<FixedWindowLimiter>,
}
