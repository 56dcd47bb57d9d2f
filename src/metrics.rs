use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::AppError;

/// Counters for guard pipeline outcomes.
#[derive(Clone)]
pub struct Metrics {
    pub requests_succeeded: Arc<AtomicU64>,
    pub requests_failed: Arc<AtomicU64>,
    pub rate_limited: Arc<AtomicU64>,
    pub auth_failures: Arc<AtomicU64>,
    pub validation_failures: Arc<AtomicU64>,
    pub audit_write_failures: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_succeeded: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            rate_limited: Arc::new(AtomicU64::new(0)),
            auth_failures: Arc::new(AtomicU64::new(0)),
            validation_failures: Arc::new(AtomicU64::new(0)),
            audit_write_failures: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a rejected request, bucketed by the stage that produced the error.
    pub fn record_failure(&self, err: &AppError) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        match err {
            AppError::RateLimited { .. } => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            AppError::Unauthorized(_) | AppError::Forbidden(_) => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
            }
            AppError::ValidationError { .. } | AppError::PayloadTooLarge { .. } | AppError::BadRequest(_) => {
                self.validation_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn inc_audit_write_failures(&self) {
        self.audit_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            audit_write_failures: self.audit_write_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub rate_limited: u64,
    pub auth_failures: u64,
    pub validation_failures: u64,
    pub audit_write_failures: u64,
    pub uptime_seconds: u64,
}
