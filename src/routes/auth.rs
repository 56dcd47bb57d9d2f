use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::accounts;
use crate::error::AppResult;
use crate::middleware::audit::AuditAction;
use crate::middleware::auth::{clear_session_cookie, extract_credential, session_cookie, Credential};
use crate::middleware::guard::{Guard, RawBody};
use crate::middleware::ip::ClientMeta;
use crate::notifications;
use crate::schema::{Mode, LOGIN};
use crate::state::AppState;

/// `POST /api/auth/login`: password login on the strict `auth` tier. Sets the session cookie.
pub async fn login(State(state): State<AppState>, client: ClientMeta, body: RawBody) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Login, "session");
    let result: AppResult<Response> = async {
        guard.limit_ip().await?;
        let payload = guard.accept(&body, &LOGIN, Mode::Create)?;
        let email = payload.get("email").and_then(Value::as_str).unwrap_or_default();
        let password = payload.get("password").and_then(Value::as_str).unwrap_or_default();

        let caller = accounts::verify_credentials(&state.db, email, password).await?;
        guard.identify(caller.clone());
        let token = accounts::create_session(&state.db, &state.config.auth, &caller.id.to_string()).await?;
        let cookie = session_cookie(&state.config.auth, &token)?;

        let body = json!({ "user": caller, "expires_in": state.config.auth.session_ttl_secs });
        Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
    }
    .await;
    guard.finish(result).await
}

/// `POST /api/auth/logout`: ends the current session. API-key callers have nothing to end.
pub async fn logout(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Logout, "session");
    let result: AppResult<Response> = async {
        guard.admit(&headers).await?;
        if let Some(Credential::Session(token)) = extract_credential(&headers, &state.config.auth.session_cookie) {
            accounts::delete_session(&state.db, &token).await?;
        }
        let cookie = clear_session_cookie(&state.config.auth)?;
        Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response())
    }
    .await;
    guard.finish(result).await
}

/// `GET /api/auth/me`: the caller with preferences and unread notification count.
pub async fn me(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, "profile");
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let user_id = caller.id.to_string();
        guard.set_resource_id(&user_id);
        let preferences = accounts::get_preferences(&state.db, &user_id).await?;
        let unread = notifications::unread_count(&state.db, &user_id).await?;
        Ok(Json(json!({ "user": caller, "preferences": preferences, "unread_notifications": unread })))
    }
    .await;
    guard.finish(result).await
}
