// src/cache.rs

//! Unified cache with in-flight request deduplication.
//!
//! Lookups go through three steps: a fresh entry is returned directly, an
//! in-flight fetch for the same key is joined, otherwise a new fetch is
//! started and every later caller for that key attaches to it. The pending
//! map is only touched under one mutex, which also guards the
//! "store entry, then drop pending" step at the end of a fetch, so at most one
//! upstream call per key is ever running.

use crate::clock::{elapsed_since, SharedClock};
use crate::error::FetchError;
use crate::metrics;
use crate::policy::{DataType, FreshnessPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Canonical cache key: `"{data_type}"` or `"{data_type}?k1=v1&k2=v2"` with parameters sorted by name.
pub fn canonical_key(data_type: &DataType, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return data_type.as_str().to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    format!("{}?{}", data_type.as_str(), query)
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub data_type: DataType,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_since(self.stored_at, now) > self.ttl
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed_since(self.stored_at, now)
    }
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    /// This caller started the upstream fetch.
    Fetched,
    /// This caller joined a fetch already in flight.
    Coalesced,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Fetched => "fetched",
            Self::Coalesced => "coalesced",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// An upstream call in progress for one canonical key.
struct PendingFetch<T: Clone> {
    future: SharedFetch<T>,
    subscribers: Arc<AtomicUsize>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub in_flight: usize,
    pub max_entries: usize,
}

pub struct RequestCoalescer<T: Clone> {
    entries: Arc<DashMap<String, CacheEntry<T>>>,
    pending: Arc<Mutex<HashMap<String, PendingFetch<T>>>>,
    policy: FreshnessPolicy,
    max_entries: usize,
    clock: SharedClock,
}

impl<T: Clone> Clone for RequestCoalescer<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            pending: Arc::clone(&self.pending),
            policy: self.policy.clone(),
            max_entries: self.max_entries,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Clone> fmt::Debug for RequestCoalescer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.pending.lock().len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(policy: FreshnessPolicy, max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            policy,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Fresh cached value for `key`, if any. Expired entries are dropped on the way.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            debug!(cache_key = %key, "Cache entry expired");
        }
        None
    }

    pub async fn get<F, Fut>(&self, key: &str, data_type: &DataType, fetch: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.get_with_status(key, data_type, fetch).await.map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also reporting whether the value came from cache,
    /// from a fetch this caller started, or from one it joined.
    pub async fn get_with_status<F, Fut>(
        &self,
        key: &str,
        data_type: &DataType,
        fetch: F,
    ) -> Result<(T, CacheStatus), FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(entry) = self.lookup(key) {
            debug!(cache_key = %key, "Cache hit");
            metrics::record_cache_lookup(CacheStatus::Hit);
            return Ok((entry.value, CacheStatus::Hit));
        }

        let (future, status) = {
            let mut pending = self.pending.lock();

            // A fetch may have finished between the lookup above and taking the lock.
            let now = self.clock.now();
            if let Some(entry) = self.entries.get(key).filter(|e| !e.is_expired(now)) {
                metrics::record_cache_lookup(CacheStatus::Hit);
                return Ok((entry.value.clone(), CacheStatus::Hit));
            }

            if let Some(in_flight) = pending.get(key) {
                let subscribers = in_flight.subscribers.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(cache_key = %key, subscribers, "Joining in-flight fetch");
                (in_flight.future.clone(), CacheStatus::Coalesced)
            } else {
                debug!(cache_key = %key, data_type = %data_type, "Cache miss, starting upstream fetch");
                let future = self.start_fetch(key.to_string(), data_type.clone(), fetch());
                pending.insert(
                    key.to_string(),
                    PendingFetch {
                        future: future.clone(),
                        subscribers: Arc::new(AtomicUsize::new(1)),
                        started_at: now,
                    },
                );
                // Driven to completion even if every caller goes away.
                tokio::spawn(future.clone());
                (future, CacheStatus::Fetched)
            }
        };

        metrics::record_cache_lookup(status);
        future.await.map(|value| (value, status))
    }

    fn start_fetch<Fut>(&self, key: String, data_type: DataType, upstream: Fut) -> SharedFetch<T>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let pending = Arc::clone(&self.pending);
        let clock = Arc::clone(&self.clock);
        let ttl = self.policy.cache_ttl(&data_type);
        let max_entries = self.max_entries;

        async move {
            let result = upstream.await;
            let mut pending = pending.lock();
            if let Ok(value) = &result {
                let now = clock.now();
                evict_for_insert(&entries, max_entries, now);
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        key: key.clone(),
                        value: value.clone(),
                        stored_at: now,
                        ttl,
                        data_type,
                    },
                );
                debug!(cache_key = %key, ttl_seconds = ttl.as_secs(), "Cached upstream result");
            }
            if let Some(done) = pending.remove(&key) {
                debug!(
                    cache_key = %key,
                    subscribers = done.subscribers.load(Ordering::Relaxed),
                    success = result.is_ok(),
                    started_at = %done.started_at,
                    "Upstream fetch settled"
                );
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Drops any cached value for `key`, then behaves as [`get_with_status`](Self::get_with_status).
    pub async fn refresh<F, Fut>(
        &self,
        key: &str,
        data_type: &DataType,
        fetch: F,
    ) -> Result<(T, CacheStatus), FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.invalidate(key);
        self.get_with_status(key, data_type, fetch).await
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes entries whose canonical key matches `pattern` (`*` matches any run of characters).
    pub fn clear(&self, pattern: &str) -> usize {
        let regex = match glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(pattern, error = %e, "Invalid cache clear pattern");
                return 0;
            }
        };
        let before = self.entries.len();
        self.entries.retain(|key, _| !regex.is_match(key));
        let removed = before.saturating_sub(self.entries.len());
        info!(pattern, cleared_entries = removed, "Cache entries cleared");
        removed
    }

    pub fn clear_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        info!(cleared_entries = count, "Cache cleared");
        count
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let total_entries = self.entries.len();
        let expired_entries = self.entries.iter().filter(|e| e.is_expired(now)).count();
        CacheStats {
            total_entries,
            expired_entries,
            active_entries: total_entries.saturating_sub(expired_entries),
            in_flight: self.in_flight(),
            max_entries: self.max_entries,
        }
    }
}

fn evict_for_insert<T>(entries: &DashMap<String, CacheEntry<T>>, max_entries: usize, now: DateTime<Utc>) {
    if entries.len() < max_entries {
        return;
    }
    entries.retain(|_, entry| !entry.is_expired(now));
    if entries.len() < max_entries {
        return;
    }
    let oldest = entries
        .iter()
        .min_by_key(|entry| entry.stored_at)
        .map(|entry| entry.key().clone());
    if let Some(oldest) = oldest {
        entries.remove(&oldest);
        debug!(removed_key = %oldest, "Evicted oldest cache entry");
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures::future::join_all;

    fn coalescer() -> (RequestCoalescer<u32>, ManualClock) {
        let clock = ManualClock::default();
        let policy = FreshnessPolicy::new().with_ttl(DataType::Odds, Duration::from_secs(120));
        (RequestCoalescer::new(policy, 100, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn canonical_key_sorts_parameters() {
        let mut params = BTreeMap::new();
        params.insert("league".to_string(), "nba".to_string());
        params.insert("date".to_string(), "2024-01-01".to_string());
        assert_eq!(canonical_key(&DataType::Odds, &params), "odds?date=2024-01-01&league=nba");
        assert_eq!(canonical_key(&DataType::Teams, &BTreeMap::new()), "teams");
    }

    #[tokio::test]
    async fn ttl_boundary_is_inclusive() {
        let (cache, clock) = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u32) }
        };

        let (_, status) = cache.get_with_status("odds", &DataType::Odds, fetch(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Fetched);

        clock.advance(Duration::from_secs(119));
        let (_, status) = cache.get_with_status("odds", &DataType::Odds, fetch(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Hit);

        clock.advance(Duration::from_secs(2));
        let (value, status) = cache.get_with_status("odds", &DataType::Odds, fetch(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Fetched);
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let (cache, _) = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..8).map(|_| {
            let calls = calls.clone();
            let cache = cache.clone();
            async move {
                cache
                    .get_with_status("odds?league=nba", &DataType::Odds, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }
        });
        let results = join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok((7, _)))));
        let fetched = results.iter().filter(|r| matches!(r, Ok((_, CacheStatus::Fetched)))).count();
        assert_eq!(fetched, 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_and_not_cached() {
        let (cache, _) = coalescer();
        let err = cache
            .get("odds", &DataType::Odds, || async { Err(FetchError::NoProviders) })
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::NoProviders);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.stats().total_entries, 0);

        let value = cache.get("odds", &DataType::Odds, || async { Ok(3) }).await.unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn refresh_bypasses_fresh_entry() {
        let (cache, _) = coalescer();
        cache.get("teams", &DataType::Teams, || async { Ok(1) }).await.unwrap();
        let (value, status) = cache.refresh("teams", &DataType::Teams, || async { Ok(2) }).await.unwrap();
        assert_eq!((value, status), (2, CacheStatus::Fetched));
        assert_eq!(cache.get("teams", &DataType::Teams, || async { Ok(3) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clear_matches_glob_patterns() {
        let (cache, _) = coalescer();
        for key in ["odds?league=nba", "odds?league=nfl", "teams"] {
            cache.get(key, &DataType::Odds, || async { Ok(1) }).await.unwrap();
        }
        assert_eq!(cache.clear("odds*"), 2);
        assert_eq!(cache.clear("odds*"), 0);
        assert_eq!(cache.clear("team"), 0);
        assert_eq!(cache.clear_all(), 1);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_entry() {
        let clock = ManualClock::default();
        let cache: RequestCoalescer<u32> = RequestCoalescer::new(FreshnessPolicy::new(), 2, Arc::new(clock.clone()));
        cache.get("a", &DataType::Teams, || async { Ok(1) }).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.get("b", &DataType::Teams, || async { Ok(2) }).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.get("c", &DataType::Teams, || async { Ok(3) }).await.unwrap();

        assert!(cache.lookup("a").is_none());
        assert!(cache.lookup("b").is_some());
        assert!(cache.lookup("c").is_some());
        assert_eq!(cache.stats().total_entries, 2);
    }
}
