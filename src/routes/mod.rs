//! HTTP route handlers for the Vexis Hub API.
//!
//! Every handler under `/api` runs the guard pipeline (see
//! [`Guard`](crate::middleware::guard::Guard)); the operational endpoints in `health` do not.
//!
//! - `auth`: login, logout, current caller
//! - `records`: generic CRUD for tasks, leads, clients, projects, financial records, webhooks
//! - `users`: user administration
//! - `api_keys`, `notifications`, `preferences`: per-user resources
//! - `reports`: summary figures and the financial CSV export
//! - `health`: health, readiness, metrics and version

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};

use crate::error::AppError;
use crate::middleware::security_headers::security_headers_middleware;
use crate::state::AppState;

pub mod api_keys;
pub mod auth;
pub mod health;
pub mod notifications;
pub mod preferences;
pub mod records;
pub mod reports;
pub mod users;

/// Builds the application router with its state and the security-header layer.
pub fn router(state: AppState) -> Router {
    let cfg = state.config.clone();
    // Hard cap on buffered bodies. Overflows surface in the guard as a regular 413.
    let body_limit = cfg.sanitize.max_payload_kb.saturating_mul(4 * 1024);

    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/{id}", get(users::get_user).patch(users::update_user).delete(users::delete_user))
        .route("/api-keys", get(api_keys::list_keys).post(api_keys::create_key))
        .route("/api-keys/{id}", delete(api_keys::revoke_key))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        .route("/preferences", get(preferences::get_preferences).put(preferences::update_preferences))
        .route("/reports/summary", get(reports::summary))
        .route("/reports/financial.csv", get(reports::financial_csv))
        .route("/{entity}", get(records::list_records).post(records::create_record))
        .route(
            "/{entity}/{id}",
            get(records::get_record).patch(records::update_record).delete(records::delete_record),
        );

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .nest("/api", api)
        .fallback(|| async { AppError::NotFound("Route not found".to_string()) })
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(cfg, security_headers_middleware))
}
