use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::audit::AuditAction;
use crate::middleware::guard::{Guard, RawBody, RawQuery};
use crate::middleware::ip::ClientMeta;
use crate::middleware::validation::{sanitize_for_logging, validate_uuid};
use crate::records::{self, ListQuery};
use crate::schema::{EntityKind, Mode};
use crate::state::AppState;

fn resolve(slug: &str) -> AppResult<EntityKind> {
    EntityKind::from_slug(slug)
        .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", sanitize_for_logging(slug))))
}

fn resource_type(slug: &str) -> &'static str {
    EntityKind::from_slug(slug).map(|k| k.resource_type()).unwrap_or("unknown")
}

pub async fn list_records(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(entity): Path<String>,
    query: RawQuery<ListQuery>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, resource_type(&entity));
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let query = guard.params(query)?;
        let kind = resolve(&entity)?;
        let page = records::list(&state.db, kind, &caller, &query).await?;
        guard.set_details(json!({ "count": page["items"].as_array().map(Vec::len), "offset": page["offset"] }));
        Ok(Json(page))
    }
    .await;
    guard.finish(result).await
}

pub async fn get_record(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, resource_type(&entity));
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let kind = resolve(&entity)?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        Ok(Json(records::get(&state.db, kind, &caller, id).await?))
    }
    .await;
    guard.finish(result).await
}

pub async fn create_record(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path(entity): Path<String>,
    body: RawBody,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Create, resource_type(&entity));
    let result: AppResult<(StatusCode, Json<Value>)> = async {
        let caller = guard.admit(&headers).await?;
        let kind = resolve(&entity)?;
        let payload = guard.accept(&body, kind.schema(), Mode::Create)?;
        let record = records::create(&state.db, kind, &caller, &payload).await?;
        if let Some(id) = record["id"].as_str() {
            guard.set_resource_id(id);
        }
        Ok((StatusCode::CREATED, Json(record)))
    }
    .await;
    guard.finish(result).await
}

pub async fn update_record(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
    body: RawBody,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Update, resource_type(&entity));
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;
        let kind = resolve(&entity)?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        let payload = guard.accept(&body, kind.schema(), Mode::Update)?;
        let changed: Vec<&String> = payload.keys().collect();
        guard.set_details(json!({ "fields": changed }));
        Ok(Json(records::update(&state.db, kind, &caller, id, &payload).await?))
    }
    .await;
    guard.finish(result).await
}

pub async fn delete_record(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Delete, resource_type(&entity));
    let result: AppResult<StatusCode> = async {
        let caller = guard.admit(&headers).await?;
        let kind = resolve(&entity)?;
        let id = validate_uuid(&id)?;
        guard.set_resource_id(id);
        records::delete(&state.db, kind, &caller, id).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    guard.finish(result).await
}
