use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::audit::AuditAction;
use crate::middleware::guard::{Guard, RawQuery};
use crate::middleware::ip::ClientMeta;
use crate::middleware::validation::validate_uuid;
use crate::notifications;
use crate::state::AppState;

const RESOURCE: &str = "notification";

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    query: RawQuery<NotificationQuery>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, RESOURCE);
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let query = guard.params(query)?;
        let user_id = caller.id.to_string();
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let items = notifications::list(&state.db, &user_id, query.unread_only, limit).await?;
        let unread = notifications::unread_count(&state.db, &user_id).await?;
        Ok(Json(json!({ "items": items, "unread": unread })))
    }
    .await;
    guard.finish(result).await
}

pub async fn mark_read(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Update, RESOURCE);
    let result: AppResult<StatusCode> = async {
        let caller = guard.admit(&headers).await?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        notifications::mark_read(&state.db, &caller.id.to_string(), &id.to_string()).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    guard.finish(result).await
}

pub async fn mark_all_read(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Update, RESOURCE);
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let updated = notifications::mark_all_read(&state.db, &caller.id.to_string()).await?;
        guard.set_details(json!({ "updated": updated }));
        Ok(Json(json!({ "updated": updated })))
    }
    .await;
    guard.finish(result).await
}

pub async fn delete_notification(
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
        notifications::delete(&state.db, &caller.id.to_string(), &id.to_string()).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    guard.finish(result).await
}
