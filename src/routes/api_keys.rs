use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::Value;

use crate::accounts::{self, ApiKeyInfo, IssuedApiKey};
use crate::error::AppResult;
use crate::middleware::audit::AuditAction;
use crate::middleware::guard::{Guard, RawBody};
use crate::middleware::ip::ClientMeta;
use crate::middleware::validation::validate_uuid;
use crate::schema::{Mode, API_KEY};
use crate::state::AppState;

const RESOURCE: &str = "api_key";

/// `GET /api/api-keys`: the caller's keys, without secrets.
pub async fn list_keys(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, RESOURCE);
    let result: AppResult<Json<Vec<ApiKeyInfo>>> = async {
        let caller = guard.admit(&headers).await?;
        Ok(Json(accounts::list_api_keys(&state.db, &caller.id.to_string()).await?))
    }
    .await;
    guard.finish(result).await
}

/// `POST /api/api-keys`: the response is the only place the plaintext key ever appears.
pub async fn create_key(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap, body: RawBody) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Create, RESOURCE);
    let result: AppResult<(StatusCode, Json<IssuedApiKey>)> = async {
        let caller = guard.admit(&headers).await?;
        let payload = guard.accept(&body, &API_KEY, Mode::Create)?;
        let name = payload.get("name").and_then(Value::as_str).unwrap_or_default();
        let expires_in_days = payload.get("expires_in_days").and_then(Value::as_i64);

        let issued = accounts::create_api_key(&state.db, &caller.id.to_string(), name, expires_in_days).await?;
        guard.set_resource_id(&issued.info.id);
        Ok((StatusCode::CREATED, Json(issued)))
    }
    .await;
    guard.finish(result).await
}

/// `DELETE /api/api-keys/{id}`: revokes the key; the row is kept for reference.
pub async fn revoke_key(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Delete, RESOURCE);
    let result: AppResult<StatusCode> = async {
        let caller = guard.admit(&headers).await?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        accounts::revoke_api_key(&state.db, &caller, id).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    guard.finish(result).await
}
