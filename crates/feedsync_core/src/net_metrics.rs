/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct NetMetrics {
    pub push_connected: AtomicBool,
    pub push_rx_bytes: AtomicU64,
    pub push_last_change_ms: AtomicU64,
    pub push_rtt_ema_ms: AtomicU64,
    pub push_reconnects: AtomicU64,
    push_last_error: Mutex<Option<String>>,

    pub http_timeouts: AtomicU64,
    pub http_errors: AtomicU64,

    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,

    pub feed_rebuilds: AtomicU64,
    pub feed_patches: AtomicU64,
    pub feed_appends: AtomicU64,
    pub stale_discards: AtomicU64,
    pub optimistic_rollbacks: AtomicU64,
}

impl NetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_push_connected(&self, v: bool) {
        self.push_connected.store(v, Ordering::Relaxed);
        self.push_last_change_ms.store(now_ms(), Ordering::Relaxed);
        if v {
            let mut g = self.push_last_error.lock().unwrap();
            *g = None;
        }
    }

    pub fn set_push_error(&self, err: String) {
        self.set_push_connected(false);
        let mut g = self.push_last_error.lock().unwrap();
        *g = Some(err);
    }

    pub fn push_rx_add(&self, n: u64) {
        self.push_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn push_rtt_update(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let prev = self.push_rtt_ema_ms.load(Ordering::Relaxed);
        let next = if prev == 0 {
            ms
        } else {
            (prev.saturating_mul(7).saturating_add(ms)) / 8
        };
        self.push_rtt_ema_ms.store(next, Ordering::Relaxed);
    }

    pub fn push_reconnect(&self) {
        self.push_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_timeout(&self) {
        self.http_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn feed_rebuild(&self) {
        self.feed_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn feed_patch(&self, n: u64) {
        self.feed_patches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn feed_append(&self, n: u64) {
        self.feed_appends.fetch_add(n, Ordering::Relaxed);
    }

    pub fn stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn optimistic_rollback(&self) {
        self.optimistic_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let last_error = self.push_last_error.lock().unwrap().clone();
        serde_json::json!({
            "ts_ms": now_ms(),
            "push": {
                "connected": self.push_connected.load(Ordering::Relaxed),
                "rx_bytes": self.push_rx_bytes.load(Ordering::Relaxed),
                "last_change_ms": self.push_last_change_ms.load(Ordering::Relaxed),
                "rtt_ms": self.push_rtt_ema_ms.load(Ordering::Relaxed),
                "reconnects": self.push_reconnects.load(Ordering::Relaxed),
                "last_error": last_error,
            },
            "cache": {
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "misses": self.cache_misses.load(Ordering::Relaxed),
            },
            "feed": {
                "rebuilds": self.feed_rebuilds.load(Ordering::Relaxed),
                "patches": self.feed_patches.load(Ordering::Relaxed),
                "appends": self.feed_appends.load(Ordering::Relaxed),
                "stale_discards": self.stale_discards.load(Ordering::Relaxed),
                "optimistic_rollbacks": self.optimistic_rollbacks.load(Ordering::Relaxed),
            },
            "errors": {
                "http_timeouts": self.http_timeouts.load(Ordering::Relaxed),
                "http_errors": self.http_errors.load(Ordering::Relaxed),
            },
        })
    }
}
