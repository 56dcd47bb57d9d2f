use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Health check endpoint - lightweight, no rate limiting
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: checks DB connectivity with timeout protection
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // Add timeout to prevent hanging readiness checks
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_snapshot();
    Json(snapshot)
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let body = format!(
        "# HELP vexis_requests_succeeded Guarded requests that completed successfully\n# TYPE vexis_requests_succeeded counter\nvexis_requests_succeeded {}\n\
# HELP vexis_requests_failed Guarded requests that ended in an error response\n# TYPE vexis_requests_failed counter\nvexis_requests_failed {}\n\
# HELP vexis_rate_limited Requests rejected by a rate-limit tier\n# TYPE vexis_rate_limited counter\nvexis_rate_limited {}\n\
# HELP vexis_auth_failures Requests rejected as unauthenticated or forbidden\n# TYPE vexis_auth_failures counter\nvexis_auth_failures {}\n\
# HELP vexis_validation_failures Requests rejected by the sanitizer or validator\n# TYPE vexis_validation_failures counter\nvexis_validation_failures {}\n\
# HELP vexis_audit_write_failures Audit entries a sink failed to write\n# TYPE vexis_audit_write_failures counter\nvexis_audit_write_failures {}\n\
# HELP vexis_uptime_seconds Uptime seconds\n# TYPE vexis_uptime_seconds gauge\nvexis_uptime_seconds {}\n",
        m.requests_succeeded,
        m.requests_failed,
        m.rate_limited,
        m.auth_failures,
        m.validation_failures,
        m.audit_write_failures,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
