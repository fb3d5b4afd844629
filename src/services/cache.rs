//! In-process TTL cache with a market-hours-aware TTL policy.
//!
//! Keys are hash digests over (function id, args, cache epoch); bumping the
//! epoch invalidates every key derived from it without touching the map.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::calendar::MarketCalendar;

pub const MARKET_HOURS_TTL_SECS: u64 = 300;
pub const OFF_HOURS_TTL_SECS: u64 = 3_600;

/// TTL selection for one cached value.
#[derive(Debug, Clone)]
pub enum TtlPolicy {
    Fixed(Duration),
    /// 300 s inside the weekday 09:30–16:00 exchange window, 3600 s outside.
    MarketHours(MarketCalendar),
}

impl TtlPolicy {
    pub fn effective_ttl(&self, now: DateTime<Utc>) -> Duration {
        match self {
            TtlPolicy::Fixed(ttl) => *ttl,
            TtlPolicy::MarketHours(cal) => {
                if cal.is_market_hours(now) {
                    Duration::from_secs(MARKET_HOURS_TTL_SECS)
                } else {
                    Duration::from_secs(OFF_HOURS_TTL_SECS)
                }
            }
        }
    }
}

struct Entry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

/// Pluggable storage behind the cache. The default is the in-process map;
/// tests can substitute their own.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn put(&self, key: String, value: serde_json::Value, ttl: Duration);
    fn purge_expired(&self);
}

#[derive(Default)]
pub struct InProcessBackend {
    entries: DashMap<String, Entry>,
}

impl CacheBackend for InProcessBackend {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() >= entry.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, key: String, value: serde_json::Value, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    fn purge_expired(&self) {
        self.entries
            .retain(|_, e| e.inserted_at.elapsed() < e.ttl);
    }
}

/// Shared cache root: the backend plus the global epoch.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    epoch: Arc<AtomicU64>,
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(Arc::new(InProcessBackend::default()))
    }
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Monotonically increment the cache epoch, invalidating every key
    /// derived from it (invariant R1).
    pub fn bump_cache_version(&self) -> u64 {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Cache epoch bumped to {}", next);
        next
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn purge_expired(&self) {
        self.backend.purge_expired();
    }

    fn key(&self, function_id: &str, args: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(function_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(args.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.epoch().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// An explicit cached computation: key derivation, TTL policy and compute
/// function are all fields of the value rather than decorator magic.
pub struct Cached<T> {
    cache: CacheLayer,
    function_id: String,
    ttl: TtlPolicy,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Cached<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(cache: CacheLayer, function_id: impl Into<String>, ttl: TtlPolicy) -> Self {
        Self {
            cache,
            function_id: function_id.into(),
            ttl,
            _marker: std::marker::PhantomData,
        }
    }

    /// Look up by args; on miss, run `compute` and store under the current
    /// epoch with the policy's effective TTL.
    pub async fn get<F, Fut, E>(&self, args: &str, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.cache.key(&self.function_id, args);

        if let Some(value) = self.cache.backend.get(&key) {
            if let Ok(hit) = serde_json::from_value::<T>(value) {
                return Ok(hit);
            }
        }

        let fresh = compute().await?;
        if let Ok(value) = serde_json::to_value(&fresh) {
            let ttl = self.ttl.effective_ttl(Utc::now());
            self.cache.backend.put(key, value, ttl);
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap().and_utc()
    }

    fn layer() -> CacheLayer {
        CacheLayer::default()
    }

    #[test]
    fn test_market_hours_ttl_policy() {
        let policy = TtlPolicy::MarketHours(MarketCalendar::new(chrono_tz::America::New_York));
        // Thursday 10:00 ET
        assert_eq!(
            policy.effective_ttl(utc("2025-06-05 14:00")),
            Duration::from_secs(300)
        );
        // Thursday 20:00 ET
        assert_eq!(
            policy.effective_ttl(utc("2025-06-06 00:00")),
            Duration::from_secs(3600)
        );
        // Saturday midday
        assert_eq!(
            policy.effective_ttl(utc("2025-06-07 15:00")),
            Duration::from_secs(3600)
        );
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cached: Cached<i32> = Cached::new(
            layer(),
            "answer",
            TtlPolicy::Fixed(Duration::from_secs(60)),
        );

        let v1: Result<i32, ()> = cached.get("x", || async { Ok(41) }).await;
        assert_eq!(v1.unwrap(), 41);

        // Second call must come from cache, not the (different) compute fn
        let v2: Result<i32, ()> = cached.get("x", || async { Ok(99) }).await;
        assert_eq!(v2.unwrap(), 41);
    }

    #[tokio::test]
    async fn test_bump_invalidates_derived_keys() {
        let cache = layer();
        let cached: Cached<i32> = Cached::new(
            cache.clone(),
            "answer",
            TtlPolicy::Fixed(Duration::from_secs(60)),
        );

        let _: Result<i32, ()> = cached.get("x", || async { Ok(1) }).await;
        let before = cache.epoch();
        let after = cache.bump_cache_version();
        assert_eq!(after, before + 1);

        let v: Result<i32, ()> = cached.get("x", || async { Ok(2) }).await;
        assert_eq!(v.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_recomputes() {
        let cached: Cached<i32> = Cached::new(
            layer(),
            "answer",
            TtlPolicy::Fixed(Duration::from_millis(10)),
        );

        let _: Result<i32, ()> = cached.get("x", || async { Ok(1) }).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        let v: Result<i32, ()> = cached.get("x", || async { Ok(2) }).await;
        assert_eq!(v.unwrap(), 2);
    }

    #[test]
    fn test_distinct_args_distinct_keys() {
        let cache = layer();
        assert_ne!(cache.key("f", "a"), cache.key("f", "b"));
        assert_ne!(cache.key("f", "a"), cache.key("g", "a"));
    }
}
