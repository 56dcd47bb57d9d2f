use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::{json, Value};

use crate::accounts::{self, NewUser, Profile};
use crate::error::{AppError, AppResult};
use crate::middleware::audit::AuditAction;
use crate::middleware::guard::{Guard, RawBody, RawQuery};
use crate::middleware::ip::ClientMeta;
use crate::middleware::validation::validate_uuid;
use crate::records::ListQuery;
use crate::schema::{Mode, USER};
use crate::state::AppState;

const RESOURCE: &str = "user";

/// `GET /api/users` (admin only)
pub async fn list_users(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    query: RawQuery<ListQuery>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, RESOURCE);
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let query = guard.params(query)?;
        caller.require_admin()?;
        let users = accounts::list_profiles(&state.db, query.limit(), query.offset()).await?;
        guard.set_details(json!({ "count": users.len() }));
        Ok(Json(json!({ "items": users, "limit": query.limit(), "offset": query.offset() })))
    }
    .await;
    guard.finish(result).await
}

/// `POST /api/users` (admin only). Auth user, profile and preferences are created atomically.
pub async fn create_user(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    body: RawBody,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Create, RESOURCE);
    let result: AppResult<(StatusCode, Json<Profile>)> = async {
        let caller = guard.admit(&headers).await?;
        caller.require_admin()?;
        let payload = guard.accept(&body, &USER, Mode::Create)?;
        let profile = accounts::create_user(&state.db, NewUser::from_payload(&payload)?).await?;
        guard.set_resource_id(&profile.id);
        guard.set_details(json!({ "role": profile.role }));
        Ok((StatusCode::CREATED, Json(profile)))
    }
    .await;
    guard.finish(result).await
}

/// `GET /api/users/{id}`: admins read anyone, users only themselves.
pub async fn get_user(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, RESOURCE);
    let result: AppResult<Json<Profile>> = async {
        let caller = guard.admit(&headers).await?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        caller.require_owner(id)?;
        Ok(Json(accounts::get_profile(&state.db, &id.to_string()).await?))
    }
    .await;
    guard.finish(result).await
}

/// `PATCH /api/users/{id}`: users may edit their own name, email and password; role changes
/// and edits of other users need an admin.
pub async fn update_user(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: RawBody,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Update, RESOURCE);
    let result: AppResult<Json<Profile>> = async {
        let caller = guard.admit(&headers).await?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        caller.require_owner(id)?;
        let payload = guard.accept(&body, &USER, Mode::Update)?;
        if payload.contains_key("role") {
            caller.require_admin()?;
            if caller.id == id {
                return Err(AppError::BadRequest("You cannot change your own role".to_string()));
            }
        }
        let changed: Vec<&str> =
            payload.keys().map(String::as_str).filter(|k| *k != "password" && USER.field(k).is_some()).collect();
        guard.set_details(json!({ "fields": changed, "password_changed": payload.contains_key("password") }));
        Ok(Json(accounts::update_user(&state.db, &id.to_string(), &payload).await?))
    }
    .await;
    guard.finish(result).await
}

/// `DELETE /api/users/{id}` (admin only, never oneself)
pub async fn delete_user(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Delete, RESOURCE);
    let result: AppResult<StatusCode> = async {
        let caller = guard.admit(&headers).await?;
        caller.require_admin()?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        if caller.id == id {
            return Err(AppError::BadRequest("You cannot delete your own account".to_string()));
        }
        accounts::delete_user(&state.db, &id.to_string()).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    guard.finish(result).await
}
