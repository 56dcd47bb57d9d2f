use axum::{
    extract::State,
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::json;

use crate::accounts::{self, Preferences};
use crate::error::AppResult;
use crate::middleware::audit::AuditAction;
use crate::middleware::guard::{Guard, RawBody};
use crate::middleware::ip::ClientMeta;
use crate::schema::{Mode, PREFERENCES};
use crate::state::AppState;

const RESOURCE: &str = "user_preferences";

/// `GET /api/preferences`: defaults are written on first read.
pub async fn get_preferences(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, RESOURCE);
    let result: AppResult<Json<Preferences>> = async {
        let caller = guard.admit(&headers).await?;
        let user_id = caller.id.to_string();
        guard.set_resource_id(&user_id);
        Ok(Json(accounts::get_preferences(&state.db, &user_id).await?))
    }
    .await;
    guard.finish(result).await
}

/// `PUT /api/preferences`: partial update; omitted settings keep their value.
pub async fn update_preferences(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    body: RawBody,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Update, RESOURCE);
    let result: AppResult<Json<Preferences>> = async {
        let caller = guard.admit(&headers).await?;
        let user_id = caller.id.to_string();
        guard.set_resource_id(&user_id);
        let payload = guard.accept(&body, &PREFERENCES, Mode::Update)?;
        let changed: Vec<&str> =
            PREFERENCES.columns().map(|f| f.name).filter(|name| payload.contains_key(*name)).collect();
        guard.set_details(json!({ "fields": changed }));
        Ok(Json(accounts::update_preferences(&state.db, &user_id, &payload).await?))
    }
    .await;
    guard.finish(result).await
}
