/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! TTL cache of parsed JSON responses keyed by request URL.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::net_metrics::NetMetrics;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    // Per-key async locks so concurrent misses for one key share one fetch.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    // Bumped by every invalidation; a fetch that straddles one is not stored.
    epoch: AtomicU64,
    metrics: Option<Arc<NetMetrics>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<NetMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    /// Cached value for `key` if it is younger than `ttl`.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let now = Instant::now();
        let g = self.entries.lock().unwrap();
        g.get(key)
            .filter(|e| e.is_fresh(now, ttl))
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: &str, value: Value) {
        let mut g = self.entries.lock().unwrap();
        g.insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(v) = self.get(key, ttl) {
            self.record(true);
            return Ok(v);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        if let Some(v) = self.get(key, ttl) {
            self.record(true);
            return Ok(v);
        }
        self.record(false);

        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = fetch().await;
        if let Ok(value) = &result {
            if self.epoch.load(Ordering::SeqCst) == epoch {
                self.insert(key, value.clone());
            } else {
                debug!(%key, "cache store skipped: invalidated while in flight");
            }
        }
        result
    }

    /// Drops every entry whose key contains `pattern`. Returns how many were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut g = self.entries.lock().unwrap();
        let before = g.len();
        g.retain(|k, _| !k.contains(pattern));
        let removed = before - g.len();
        if removed > 0 {
            debug!(%pattern, removed, "cache invalidated");
        }
        removed
    }

    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let removed = {
            let mut g = self.entries.lock().unwrap();
            let before = g.len();
            g.retain(|_, e| e.is_fresh(now, ttl));
            before - g.len()
        };
        let mut locks = self.inflight.lock().unwrap();
        locks.retain(|_, l| Arc::strong_count(l) > 1);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut g = self.inflight.lock().unwrap();
        g.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn record(&self, hit: bool) {
        if let Some(m) = &self.metrics {
            if hit {
                m.cache_hit();
            } else {
                m.cache_miss();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn counted_fetch(calls: Arc<AtomicUsize>, v: Value) -> Result<Value, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(v)
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_serves_cached_then_refetches() {
        let cache = ResponseCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_millis(30_000);

        let v = cache
            .get_or_fetch("/feed?limit=50", ttl, || counted_fetch(calls.clone(), json!({"n": 1})))
            .await
            .unwrap();
        assert_eq!(v, json!({"n": 1}));

        tokio::time::advance(Duration::from_millis(10_000)).await;
        let v = cache
            .get_or_fetch("/feed?limit=50", ttl, || counted_fetch(calls.clone(), json!({"n": 2})))
            .await
            .unwrap();
        assert_eq!(v, json!({"n": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(30_000)).await;
        let v = cache
            .get_or_fetch("/feed?limit=50", ttl, || counted_fetch(calls.clone(), json!({"n": 3})))
            .await
            .unwrap();
        assert_eq!(v, json!({"n": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_removes_matching_keys_only() {
        let cache = ResponseCache::new();
        cache.insert("/api/instagram/feed?limit=50", json!(1));
        cache.insert("/api/instagram/feed?limit=50&offset=50", json!(2));
        cache.insert("/api/instagram/notifications?limit=5", json!(3));

        assert_eq!(cache.invalidate("/feed"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/api/instagram/notifications?limit=5", DEFAULT_TTL).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let cache = ResponseCache::new();
        let err: Result<Value, String> = cache
            .get_or_fetch("k", DEFAULT_TTL, || async { Err("offline".to_string()) })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = ResponseCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, String>(json!("body"))
            }
        };
        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", DEFAULT_TTL, slow),
            cache.get_or_fetch("k", DEFAULT_TTL, slow)
        );
        assert_eq!(a.unwrap(), json!("body"));
        assert_eq!(b.unwrap(), json!("body"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_fetch_skips_store() {
        let cache = ResponseCache::new();
        let fetch = async {
            cache
                .get_or_fetch("/feed", DEFAULT_TTL, || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(json!("old"))
                })
                .await
        };
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.invalidate("/feed");
        };
        let (res, _) = tokio::join!(fetch, invalidate);
        assert_eq!(res.unwrap(), json!("old"));
        assert!(cache.get("/feed", DEFAULT_TTL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries() {
        let cache = ResponseCache::new();
        cache.insert("a", json!(1));
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.insert("b", json!(2));
        assert_eq!(cache.purge_expired(DEFAULT_TTL), 1);
        assert_eq!(cache.len(), 1);
    }
}
