//! The request-guard pipeline.
//!
//! Every `/api` handler builds a [`Guard`] first and routes its outcome through
//! [`Guard::finish`]:
//!
//! ```text
//! limit_ip -> authenticate -> limit_user -> accept (size, sanitize, denylist, schema)
//!          -> handler work -> finish (audit, metrics, rate-limit headers)
//! ```
//!
//! Each stage returns an [`AppError`] that short-circuits the rest. `finish` runs no matter
//! where the chain stopped, so rejected requests are audited like successful ones.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};

use super::audit::{AuditAction, AuditEntry, AuditStatus};
use super::auth::{self, Caller};
use super::ip::ClientMeta;
use super::rate_limit::{RateLimitStatus, RateLimiter};
use super::sanitize::{check_payload_size, find_forbidden, sanitize_value};
use crate::error::{AppError, AppResult};
use crate::schema::{Mode, Schema};
use crate::state::AppState;

/// A request body whose extraction may have failed.
///
/// Handlers take this instead of `Bytes` so an oversized or unreadable body is rejected by
/// [`Guard::accept`] after the rate limiter and authenticator ran, with the usual envelope
/// and audit entry.
pub type RawBody = Result<Bytes, BytesRejection>;

/// Query parameters whose deserialization may have failed; see [`Guard::params`].
pub type RawQuery<T> = Result<Query<T>, QueryRejection>;

pub struct Guard {
    state: AppState,
    client: ClientMeta,
    action: AuditAction,
    resource_type: String,
    caller: Option<Caller>,
    resource_id: Option<String>,
    details: Option<Value>,
    quota: Option<RateLimitStatus>,
}

impl Guard {
    pub fn new(state: &AppState, client: ClientMeta, action: AuditAction, resource_type: &str) -> Self {
        Self {
            state: state.clone(),
            client,
            action,
            resource_type: resource_type.to_string(),
            caller: None,
            resource_id: None,
            details: None,
            quota: None,
        }
    }

    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    pub fn client(&self) -> &ClientMeta {
        &self.client
    }

    /// The per-IP tier for this action: login is throttled hardest, reads most leniently.
    fn ip_tier(&self) -> &RateLimiter {
        let limiters = &self.state.limiters;
        match self.action {
            AuditAction::Login => &limiters.auth,
            AuditAction::Read | AuditAction::Export => &limiters.read,
            AuditAction::Create | AuditAction::Update | AuditAction::Delete | AuditAction::Logout => {
                &limiters.write
            }
        }
    }

    fn note_quota(&mut self, status: RateLimitStatus) {
        let tighter = match &self.quota {
            Some(current) => status.remaining < current.remaining,
            None => true,
        };
        if tighter {
            self.quota = Some(status);
        }
    }

    pub async fn limit_ip(&mut self) -> AppResult<()> {
        let key = self.client.ip.to_string();
        let status = self.ip_tier().check(&key).await?;
        self.note_quota(status);
        Ok(())
    }

    pub async fn authenticate(&mut self, headers: &HeaderMap) -> AppResult<Caller> {
        let caller = auth::authenticate(&self.state.db, &self.state.config.auth, headers).await?;
        self.caller = Some(caller.clone());
        Ok(caller)
    }

    /// Per-user tier; a no-op until a caller is known.
    pub async fn limit_user(&mut self) -> AppResult<()> {
        let Some(caller) = &self.caller else {
            return Ok(());
        };
        let key = caller.id.to_string();
        let status = self.state.limiters.user.check(&key).await?;
        self.note_quota(status);
        Ok(())
    }

    /// The front of the pipeline for authenticated routes.
    pub async fn admit(&mut self, headers: &HeaderMap) -> AppResult<Caller> {
        self.limit_ip().await?;
        let caller = self.authenticate(headers).await?;
        self.limit_user().await?;
        Ok(caller)
    }

    /// Records a caller established outside [`Guard::authenticate`] (password login).
    pub fn identify(&mut self, caller: Caller) {
        self.caller = Some(caller);
    }

    pub fn set_resource_id(&mut self, id: impl ToString) {
        self.resource_id = Some(id.to_string());
    }

    pub fn set_details(&mut self, details: Value) {
        self.details = Some(details);
    }

    /// Unwraps query parameters, turning a malformed query string into a 400.
    pub fn params<T>(&self, query: RawQuery<T>) -> AppResult<T> {
        match query {
            Ok(Query(params)) => Ok(params),
            Err(e) => {
                tracing::debug!(ip = %self.client.ip, "Rejected query string: {}", e.body_text());
                Err(AppError::BadRequest("Invalid query parameters".to_string()))
            }
        }
    }

    /// Parses a JSON body and runs it through size check, sanitizer, denylist and `schema`.
    ///
    /// Returns the cleaned object. Unknown keys are kept; persistence only reads declared
    /// fields.
    pub fn accept(&self, body: &RawBody, schema: &Schema, mode: Mode) -> AppResult<Map<String, Value>> {
        let cfg = &self.state.config.sanitize;
        let body = match body {
            Ok(bytes) => bytes,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(AppError::PayloadTooLarge { limit_kb: cfg.max_payload_kb });
            }
            Err(e) => {
                tracing::debug!(ip = %self.client.ip, "Unreadable request body: {}", e.body_text());
                return Err(AppError::BadRequest("Invalid request body".to_string()));
            }
        };
        let value: Value =
            serde_json::from_slice(body).map_err(|_| AppError::BadRequest("Invalid JSON body".to_string()))?;

        check_payload_size(&value, cfg.max_payload_kb)?;
        let Value::Object(mut map) = value else {
            return Err(AppError::BadRequest("Request body must be a JSON object".to_string()));
        };

        // Verbatim fields bypass the sanitizer and the denylist
        let mut held = Vec::new();
        for field in schema.verbatim() {
            if let Some(Value::String(raw)) = map.get(field.name) {
                held.push((field.name, raw.clone()));
                map.remove(field.name);
            }
        }

        let value = sanitize_value(Value::Object(map), cfg)?;
        if let Some(hit) = find_forbidden(&value) {
            tracing::warn!(field = %hit.field, ip = %self.client.ip, "Denylisted content rejected");
            return Err(AppError::ValidationError {
                message: format!("Invalid content detected in field '{}'", hit.field),
                field: hit.field,
            });
        }
        let Value::Object(mut map) = value else {
            return Err(AppError::BadRequest("Request body must be a JSON object".to_string()));
        };
        for (name, raw) in held {
            map.insert(name.to_string(), Value::String(raw));
        }

        schema.validate(&map, mode)?;
        Ok(map)
    }

    /// Ends the pipeline: writes the audit entry, counts the outcome and builds the response.
    pub async fn finish<T: IntoResponse>(self, result: AppResult<T>) -> Response {
        let (status, error_message) = match &result {
            Ok(_) => {
                self.state.metrics.inc_succeeded();
                (AuditStatus::Success, None)
            }
            Err(e) => {
                self.state.metrics.record_failure(e);
                (AuditStatus::Failure, Some(e.to_string()))
            }
        };

        self.state
            .audit
            .record(AuditEntry {
                actor_id: self.caller.as_ref().map(|c| c.id),
                action: self.action,
                resource_type: self.resource_type,
                resource_id: self.resource_id,
                details: self.details,
                status,
                error_message,
                ip_address: self.client.ip,
                user_agent: self.client.user_agent,
                timestamp: Utc::now(),
            })
            .await;

        let rejected_by_limiter = matches!(result, Err(AppError::RateLimited { .. }));
        let mut response = match result {
            Ok(ok) => ok.into_response(),
            Err(e) => e.into_response(),
        };
        if let (Some(quota), false) = (self.quota, rejected_by_limiter) {
            quota.apply_headers(response.headers_mut());
        }
        response
    }
}
