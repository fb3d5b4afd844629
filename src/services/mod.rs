pub mod cache;
pub mod rate_limiter;
pub mod robots;
