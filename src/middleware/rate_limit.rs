//! Fixed-window rate limiting for the guard pipeline.
//!
//! Counters live in a [`RateLimitStore`]. The default [`MemoryRateLimitStore`] is
//! process-local, so limits are per instance; a shared key-value store can be plugged in
//! behind the same trait for multi-instance deployments.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};

use crate::config::{RateLimitSettings, TierConfig};
use crate::error::AppError;

/// Request count for one caller key within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Storage for rate-limit counters.
///
/// `increment` must be atomic per key: it either starts a new window (`count = 1`,
/// `reset_at = now + window`) when no live record exists, or bumps the count of the
/// current one.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<RateLimitRecord>>;

    async fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> anyhow::Result<RateLimitRecord>;

    /// Deletes every record whose window has ended. Returns how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> anyhow::Result<usize>;
}

/// In-process store backed by a `HashMap` behind a tokio `RwLock`.
#[derive(Debug, Default, Clone)]
pub struct MemoryRateLimitStore {
    records: Arc<RwLock<HashMap<String, RateLimitRecord>>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<RateLimitRecord>> {
        Ok(self.records.read().await.get(key).copied())
    }

    async fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> anyhow::Result<RateLimitRecord> {
        let window = chrono::Duration::from_std(window)?;
        let mut records = self.records.write().await;
        let record = records
            .entry(key.to_string())
            .and_modify(|r| {
                if r.is_expired(now) {
                    *r = RateLimitRecord { count: 1, reset_at: now + window };
                } else {
                    r.count = r.count.saturating_add(1);
                }
            })
            .or_insert(RateLimitRecord { count: 1, reset_at: now + window });
        Ok(*record)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}

/// Quota left after an allowed request, rendered as `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitStatus {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(self.limit));
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from(self.remaining));
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(self.reset_at.timestamp().max(0) as u64),
        );
    }
}

/// A rejected request: the key used up its quota for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub limit: u32,
    /// Time until the window resets. Never longer than the window itself.
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// `Retry-After` value: whole seconds, rounded up, at least 1.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let secs = if self.retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}

impl From<RateLimitExceeded> for AppError {
    fn from(e: RateLimitExceeded) -> Self {
        AppError::RateLimited { retry_after_seconds: e.retry_after_seconds() }
    }
}

/// One named rate-limit tier over a shared store.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    config: TierConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `name` - Namespace for the keys of this tier inside the store.
    /// * `config` - The window length and the maximum number of requests within it.
    /// * `store` - Where the counters live.
    pub fn new(name: &'static str, config: TierConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { name, config, store }
    }

    /// Counts one request for `key` at `now`.
    ///
    /// The store failing is not the caller's fault, so the request is let through with a
    /// warning instead of being rejected.
    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitStatus, RateLimitExceeded> {
        let namespaced = format!("{}:{}", self.name, key);
        let max = self.config.max_requests;
        let record = match self.store.increment(&namespaced, self.config.window(), now).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(tier = self.name, "Rate limit store unavailable, allowing request: {}", e);
                return Ok(RateLimitStatus {
                    limit: max,
                    remaining: max,
                    reset_at: now + chrono::Duration::seconds(self.config.window_secs as i64),
                });
            }
        };

        if record.count > max {
            let retry_after = (record.reset_at - now).to_std().unwrap_or(Duration::ZERO).min(self.config.window());
            tracing::debug!(tier = self.name, key, count = record.count, "Rate limit exceeded");
            return Err(RateLimitExceeded { limit: max, retry_after });
        }

        Ok(RateLimitStatus { limit: max, remaining: max - record.count, reset_at: record.reset_at })
    }

    pub async fn check(&self, key: &str) -> Result<RateLimitStatus, RateLimitExceeded> {
        self.check_at(key, Utc::now()).await
    }
}

/// The four tiers of the guard pipeline, sharing one store.
#[derive(Clone)]
pub struct RateLimiters {
    /// Credential-sensitive endpoints (login).
    pub auth: RateLimiter,
    pub write: RateLimiter,
    pub read: RateLimiter,
    /// Per authenticated user, layered on top of the per-IP tiers.
    pub user: RateLimiter,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiters {
    pub fn new(settings: &RateLimitSettings, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            auth: RateLimiter::new("auth", settings.auth, store.clone()),
            write: RateLimiter::new("write", settings.write, store.clone()),
            read: RateLimiter::new("read", settings.read, store.clone()),
            user: RateLimiter::new("user", settings.user, store.clone()),
            store,
        }
    }

    /// Tiers over a fresh process-local store.
    pub fn in_memory(settings: &RateLimitSettings) -> Self {
        Self::new(settings, Arc::new(MemoryRateLimitStore::new()))
    }

    /// Removes expired counters from the shared store.
    pub async fn sweep(&self) -> usize {
        match self.store.sweep(Utc::now()).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!("Rate limit sweep removed {} expired entries", removed);
                }
                removed
            }
            Err(e) => {
                tracing::warn!("Rate limit sweep failed: {}", e);
                0
            }
        }
    }
}

/// Spawns the periodic sweep that keeps the counter map from growing without bound.
pub fn spawn_sweeper(limiters: RateLimiters, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            limiters.sweep().await;
        }
    })
}
