//! Integration and unit tests for the Vexis Hub application.
//!
//! The API suites drive the real router with `tower::ServiceExt::oneshot` over an in-memory
//! SQLite database, so every request passes through the full guard pipeline.
//!
//! ## Test Modules
//!
//! - **pipeline_tests**: Guard pipeline behaviour (auth, limits, sanitizer, audit)
//! - **records_api_tests**: Entity CRUD, ownership, task assignees, reports
//! - **account_api_tests**: Login/logout, users, API keys, preferences, notifications
//! - **health_api_tests**: Operational endpoints
//! - **error_tests**: Error taxonomy and response envelope
//! - **config_tests**: Configuration loading and validation
//! - **db_tests**: Schema initialization and schema/table agreement
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test pipeline_tests
//! ```

pub mod records_api_tests;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tower::ServiceExt;

use crate::accounts::{self, NewUser, Profile};
use crate::config::AppConfig;
use crate::middleware::auth::Role;
use crate::middleware::rate_limit::RateLimitStore;
use crate::state::AppState;

/// A single-connection in-memory database with the schema applied.
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

pub(crate) struct TestApp {
    pub app: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let state = AppState::new(test_pool().await, config);
        Self { app: crate::routes::router(state.clone()), state }
    }

    /// Same as [`TestApp::with_config`], with rate-limit counters kept in `store`.
    pub async fn with_store(config: AppConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let state = AppState::with_store(test_pool().await, config, store);
        Self { app: crate::routes::router(state.clone()), state }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    /// Creates a user and returns its profile and a ready-to-send session cookie.
    pub async fn user(&self, email: &str, role: Role) -> (Profile, String) {
        let profile = accounts::create_user(
            self.db(),
            NewUser {
                email: email.to_string(),
                full_name: email.split('@').next().unwrap_or("user").to_string(),
                password: "password123".to_string(),
                role,
            },
        )
        .await
        .unwrap();
        let token = accounts::create_session(self.db(), &self.state.config.auth, &profile.id).await.unwrap();
        let cookie = format!("{}={}", self.state.config.auth.session_cookie, token);
        (profile, cookie)
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, headers, body)
    }

    pub async fn call(&self, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
        self.send(request(method, uri, cookie, body)).await
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table)).fetch_one(self.db()).await.unwrap()
    }
}

pub(crate) fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header(header::USER_AGENT, "vexis-tests");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
