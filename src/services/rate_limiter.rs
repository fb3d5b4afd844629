//! Request throttling primitives.
//!
//! Two concerns live here: the fixed-window counter protecting inbound
//! login-like routes, and the per-host politeness gate used by outbound
//! scrape jobs.

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::debug;

pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_LIMIT: u32 = 5;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOutcome {
    Allowed,
    /// Too many requests in the current window.
    Rejected,
}

/// Fixed-window counter keyed by (client IP, route).
///
/// The bucket index is `floor(now / window)`; a counter lives exactly one
/// window. Different IPs count independently.
pub struct FixedWindowLimiter {
    window: Duration,
    limit: u32,
    counters: DashMap<(String, String, u64), u32>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            window,
            limit,
            counters: DashMap::new(),
        }
    }

    pub fn from_env() -> Self {
        let window = std::env::var("RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_WINDOW_SECS);
        let limit = std::env::var("RATE_LIMIT_MAX_REQUESTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LIMIT);
        Self::new(Duration::from_secs(window), limit)
    }

    pub fn check(&self, client_ip: &str, route: &str) -> LimitOutcome {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_at(client_ip, route, now)
    }

    /// Deterministic variant for tests: caller provides the wall-clock second.
    pub fn check_at(&self, client_ip: &str, route: &str, now_secs: u64) -> LimitOutcome {
        let bucket = now_secs / self.window.as_secs().max(1);
        let key = (client_ip.to_string(), route.to_string(), bucket);

        let mut count = self.counters.entry(key).or_insert(0);
        if *count >= self.limit {
            debug!(
                "Rate limit exceeded for {} on {} (bucket {})",
                client_ip, route, bucket
            );
            return LimitOutcome::Rejected;
        }
        *count += 1;
        LimitOutcome::Allowed
    }

    /// Drop buckets older than the current window. Called opportunistically.
    pub fn prune(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let current = now / self.window.as_secs().max(1);
        self.counters.retain(|(_, _, bucket), _| *bucket + 1 >= current);
    }
}

/// Politeness gate for outbound crawls: at least `min_delay` between two
/// requests to the same host. Await points sleep outside the lock.
pub struct HostGate {
    min_delay: Duration,
    last_request: DashMap<String, Arc<Mutex<Instant>>>,
}

impl HostGate {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: DashMap::new(),
        }
    }

    pub async fn acquire(&self, host: &str) {
        let slot = self
            .last_request
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now() - self.min_delay)))
            .clone();

        let wait = {
            let last = slot.lock();
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                Some(self.min_delay - elapsed)
            } else {
                None
            }
        };

        if let Some(delay) = wait {
            sleep(delay).await;
        }

        *slot.lock() = Instant::now();
    }
}

/// Delay between two ticker searches on a social platform: uniform(10, 30) s.
pub async fn social_search_delay() {
    let delay = {
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(10_000..30_000))
    };
    debug!("Social search delay: {}ms", delay.as_millis());
    sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert_eq!(limiter.check_at("1.2.3.4", "/login", 1000), LimitOutcome::Allowed);
        }
        assert_eq!(limiter.check_at("1.2.3.4", "/login", 1000), LimitOutcome::Rejected);
    }

    #[test]
    fn test_new_window_resets_counter() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 2);
        assert_eq!(limiter.check_at("ip", "/login", 100), LimitOutcome::Allowed);
        assert_eq!(limiter.check_at("ip", "/login", 100), LimitOutcome::Allowed);
        assert_eq!(limiter.check_at("ip", "/login", 100), LimitOutcome::Rejected);
        // 100s and 200s fall in different 60-second buckets
        assert_eq!(limiter.check_at("ip", "/login", 200), LimitOutcome::Allowed);
    }

    #[test]
    fn test_independent_counters_per_ip_and_route() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 1);
        assert_eq!(limiter.check_at("a", "/login", 10), LimitOutcome::Allowed);
        assert_eq!(limiter.check_at("a", "/login", 10), LimitOutcome::Rejected);
        assert_eq!(limiter.check_at("b", "/login", 10), LimitOutcome::Allowed);
        assert_eq!(limiter.check_at("a", "/other", 10), LimitOutcome::Allowed);
    }

    #[tokio::test]
    async fn test_host_gate_enforces_delay() {
        let gate = HostGate::new(Duration::from_millis(100));
        let start = Instant::now();
        gate.acquire("example.com").await;
        gate.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_host_gate_hosts_independent() {
        let gate = HostGate::new(Duration::from_millis(200));
        let start = Instant::now();
        gate.acquire("a.example").await;
        gate.acquire("b.example").await;
        // Different hosts should not wait on each other
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
