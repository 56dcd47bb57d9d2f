use std::sync::Arc;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::audit::AuditLogger;
use crate::middleware::rate_limit::{RateLimitStore, RateLimiters};

/// The shared application state.
///
/// Cloned into every handler. The rate-limit store behind `limiters` is the only mutable
/// state shared between requests.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Per-IP tiers (auth, write, read) and the per-user tier.
    pub limiters: RateLimiters,
    pub audit: AuditLogger,
}

impl AppState {
    /// Creates a new `AppState` with a process-local rate-limit store.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let limiters = RateLimiters::in_memory(&config.rate_limit);
        Self::with_limiters(db, config, limiters)
    }

    /// Same as [`AppState::new`], with counters kept in `store`.
    pub fn with_store(db: sqlx::SqlitePool, config: AppConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let limiters = RateLimiters::new(&config.rate_limit, store);
        Self::with_limiters(db, config, limiters)
    }

    fn with_limiters(db: sqlx::SqlitePool, config: AppConfig, limiters: RateLimiters) -> Self {
        let metrics = Metrics::new();
        let audit = AuditLogger::from_config(&config.audit, db.clone(), metrics.clone());
        Self { db, config: Arc::new(config), metrics, limiters, audit }
    }
}
