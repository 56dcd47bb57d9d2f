//! Security headers for every HTTP response.
//!
//! Applied as the outermost router layer, so error responses produced by the guard
//! pipeline get the same treatment as successful ones.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA, SERVER};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::{AppConfig, DEFAULT_CSP};

/// Adds the standard security headers and strips server identification.
///
/// # Security Headers Applied
///
/// - `X-Content-Type-Options: nosniff`
/// - `X-Frame-Options: DENY`
/// - `Content-Security-Policy` from `security.csp`, or [`DEFAULT_CSP`]
/// - `Referrer-Policy: strict-origin-when-cross-origin`
/// - `Permissions-Policy: geolocation=(), microphone=(), camera=()`
/// - `Cross-Origin-Opener-Policy` / `Cross-Origin-Resource-Policy: same-origin`
/// - Optional: `Strict-Transport-Security` via configuration
///
/// API paths and JSON bodies additionally get `Cache-Control: no-store` and `Pragma: no-cache`.
pub async fn security_headers_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let is_api = req.uri().path().starts_with("/api/");
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    let sec = cfg.security.as_ref();
    let csp = sec
        .and_then(|s| s.csp.as_deref())
        .filter(|csp| !csp.trim().is_empty())
        .and_then(|csp| HeaderValue::from_str(csp).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CSP));
    headers.insert(HeaderName::from_static("content-security-policy"), csp);

    if let Some(sec) = sec {
        if sec.enable_hsts.unwrap_or(false) {
            let max_age = sec.hsts_max_age.unwrap_or(31536000); // 1 year
            let include_sub =
                if sec.hsts_include_subdomains.unwrap_or(false) { "; includeSubDomains" } else { "" };
            let value = format!("max-age={}{}", max_age, include_sub);
            headers.insert(
                HeaderName::from_static("strict-transport-security"),
                HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("max-age=31536000")),
            );
        }
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|s| s.starts_with("application/json"))
        .unwrap_or(false);
    if is_api || is_json {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    headers.remove(SERVER);
    headers.remove(HeaderName::from_static("x-powered-by"));

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(cfg: AppConfig) -> Router {
        Router::new()
            .route("/api/ping", get(|| async { ([(SERVER, "hyper"), (HeaderName::from_static("x-powered-by"), "x")], "pong") }))
            .route("/plain", get(|| async { "plain" }))
            .layer(from_fn_with_state(Arc::new(cfg), security_headers_middleware))
    }

    async fn get_headers(cfg: AppConfig, path: &str) -> axum::http::HeaderMap {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        app(cfg).oneshot(req).await.unwrap().headers().clone()
    }

    #[tokio::test]
    async fn test_api_responses_get_full_header_set() {
        let headers = get_headers(AppConfig::default(), "/api/ping").await;
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers["content-security-policy"], DEFAULT_CSP);
        assert_eq!(headers[CACHE_CONTROL], "no-store");
        assert_eq!(headers[PRAGMA], "no-cache");
        assert!(headers.get(SERVER).is_none());
        assert!(headers.get("x-powered-by").is_none());
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_non_api_text_is_cacheable_and_hsts_is_configurable() {
        let mut cfg = AppConfig::default();
        cfg.security = Some(SecurityConfig {
            enable_hsts: Some(true),
            hsts_max_age: Some(600),
            hsts_include_subdomains: Some(true),
            csp: Some("default-src 'none'".into()),
        });
        let headers = get_headers(cfg, "/plain").await;
        assert!(headers.get(CACHE_CONTROL).is_none());
        assert_eq!(headers["strict-transport-security"], "max-age=600; includeSubDomains");
        assert_eq!(headers["content-security-policy"], "default-src 'none'");
    }
}
