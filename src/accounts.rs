//! Users, sessions, API keys and per-user preferences.
//!
//! A user is three rows: credentials in `users`, identity and role in `profiles`, and
//! defaults in `user_preferences`. They are always created together in one transaction.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db;
use crate::error::{AppError, AppResult, OptionExt};
use crate::middleware::auth::{generate_token, hash_password, hash_token, verify_password, Caller, Role, API_KEY_PREFIX};
use crate::records::push_bind_field;
use crate::schema::{PREFERENCES, USER};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub role: Role,
}

impl NewUser {
    /// Builds a user from a payload already validated against [`USER`] in create mode.
    pub fn from_payload(payload: &Map<String, Value>) -> AppResult<Self> {
        let text = |name: &str| -> AppResult<String> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AppError::ValidationError { field: name.to_string(), message: format!("{} is required", name) })
        };
        let role = match payload.get("role").and_then(Value::as_str) {
            Some(r) => Role::parse(r).ok_or_else(|| AppError::BadRequest(format!("Unknown role: {}", r)))?,
            None => Role::User,
        };
        Ok(Self { email: text("email")?, full_name: text("full_name")?, password: text("password")?, role })
    }
}

pub async fn create_user(pool: &SqlitePool, user: NewUser) -> AppResult<Profile> {
    let password_hash = hash_password(&user.password)?;
    let id = Uuid::new_v4().to_string();
    let email = user.email.to_lowercase();
    let now = db::now();

    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO profiles (id, email, full_name, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&user.full_name)
    .bind(user.role.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    sqlx::query("INSERT INTO user_preferences (user_id, updated_at) VALUES (?, ?)")
        .bind(&id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, role = user.role.as_str(), "Created user");
    get_profile(pool, &id).await
}

pub async fn get_profile(pool: &SqlitePool, id: &str) -> AppResult<Profile> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_not_found("User")
}

pub async fn list_profiles(pool: &SqlitePool, limit: i64, offset: i64) -> AppResult<Vec<Profile>> {
    let rows = sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY created_at, id LIMIT ? OFFSET ?")
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Applies a payload validated against [`USER`] in update mode. Email and password changes
/// touch `users` as well, in the same transaction.
pub async fn update_user(pool: &SqlitePool, id: &str, payload: &Map<String, Value>) -> AppResult<Profile> {
    let email = payload.get("email").and_then(Value::as_str).map(str::to_lowercase);
    let full_name = payload.get("full_name").and_then(Value::as_str);
    let role = payload.get("role").and_then(Value::as_str);
    let password_hash = payload.get("password").and_then(Value::as_str).map(hash_password).transpose()?;

    if email.is_none() && full_name.is_none() && role.is_none() && password_hash.is_none() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let now = db::now();
    let mut tx = pool.begin().await?;
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    exists.ok_or_not_found("User")?;

    sqlx::query(
        "UPDATE profiles SET email = COALESCE(?, email), full_name = COALESCE(?, full_name),
         role = COALESCE(?, role), updated_at = ? WHERE id = ?",
    )
    .bind(email.as_deref())
    .bind(full_name)
    .bind(role)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if email.is_some() || password_hash.is_some() {
        sqlx::query("UPDATE users SET email = COALESCE(?, email), password_hash = COALESCE(?, password_hash) WHERE id = ?")
            .bind(email.as_deref())
            .bind(password_hash.as_deref())
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    if password_hash.is_some() {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?").bind(id).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    get_profile(pool, id).await
}

/// Removes the auth user; profile, preferences, sessions, keys and owned rows cascade.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?").bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    Ok(())
}

/// Checks an email/password pair and returns the matching caller.
pub async fn verify_credentials(pool: &SqlitePool, email: &str, password: &str) -> AppResult<Caller> {
    let row: Option<(String, String)> = sqlx::query_as("SELECT id, password_hash FROM users WHERE email = ?")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?;
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let (id, stored_hash) = row.ok_or_else(invalid)?;
    if !verify_password(password, &stored_hash) {
        return Err(invalid());
    }
    crate::middleware::auth::load_profile(pool, &id).await?.ok_or_not_found("Profile")
}

/// Issues a session token for `user_id`. Only the token's hash is stored.
pub async fn create_session(pool: &SqlitePool, cfg: &AuthConfig, user_id: &str) -> AppResult<String> {
    let token = generate_token();
    let now = Utc::now();
    let expires_at = now + Duration::seconds(cfg.session_ttl_secs as i64);

    sqlx::query("DELETE FROM sessions WHERE user_id = ? AND expires_at <= ?")
        .bind(user_id)
        .bind(db::timestamp(now))
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(db::timestamp(now))
        .bind(db::timestamp(expires_at))
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = ?").bind(hash_token(token)).execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    /// First characters of the key, enough to recognise it.
    pub prefix: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub last_used_at: Option<String>,
}

/// A freshly created key. The plaintext is returned once and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    #[serde(flatten)]
    pub info: ApiKeyInfo,
    pub key: String,
}

pub async fn create_api_key(
    pool: &SqlitePool,
    owner_id: &str,
    name: &str,
    expires_in_days: Option<i64>,
) -> AppResult<IssuedApiKey> {
    let id = Uuid::new_v4().to_string();
    let key = format!("{}{}", API_KEY_PREFIX, generate_token());
    let prefix: String = key.chars().take(12).collect();
    let now = Utc::now();
    let expires_at = expires_in_days.map(|days| db::timestamp(now + Duration::days(days)));

    sqlx::query(
        "INSERT INTO api_keys (id, owner_id, name, prefix, key_hash, created_at, expires_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(owner_id)
    .bind(name)
    .bind(&prefix)
    .bind(hash_token(&key))
    .bind(db::timestamp(now))
    .bind(&expires_at)
    .execute(pool)
    .await?;

    let info = sqlx::query_as::<_, ApiKeyInfo>(
        "SELECT id, name, prefix, created_at, expires_at, revoked_at, last_used_at FROM api_keys WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(pool)
    .await?;
    Ok(IssuedApiKey { info, key })
}

pub async fn list_api_keys(pool: &SqlitePool, owner_id: &str) -> AppResult<Vec<ApiKeyInfo>> {
    let rows = sqlx::query_as::<_, ApiKeyInfo>(
        "SELECT id, name, prefix, created_at, expires_at, revoked_at, last_used_at
         FROM api_keys WHERE owner_id = ? ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Revokes a key owned by `caller` (or any key, for admins). Revoking twice is a no-op.
pub async fn revoke_api_key(pool: &SqlitePool, caller: &Caller, id: Uuid) -> AppResult<()> {
    let owner: Option<String> = sqlx::query_scalar("SELECT owner_id FROM api_keys WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    let owner = owner.ok_or_not_found("API key")?;
    caller.require_owner(parse_owner(&owner)?)?;

    sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
        .bind(db::now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) fn parse_owner(owner_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(owner_id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt owner id {}: {}", owner_id, e)))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Preferences {
    pub user_id: String,
    pub theme: String,
    pub language: String,
    pub timezone: String,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub updated_at: String,
}

/// Reads the preferences of `user_id`, creating the default row on first access.
pub async fn get_preferences(pool: &SqlitePool, user_id: &str) -> AppResult<Preferences> {
    sqlx::query("INSERT OR IGNORE INTO user_preferences (user_id, updated_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(db::now())
        .execute(pool)
        .await?;
    let prefs = sqlx::query_as::<_, Preferences>("SELECT * FROM user_preferences WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(prefs)
}

/// Applies a payload validated against [`PREFERENCES`] in update mode.
pub async fn update_preferences(pool: &SqlitePool, user_id: &str, payload: &Map<String, Value>) -> AppResult<Preferences> {
    let changes: Vec<_> = PREFERENCES.columns().filter_map(|f| payload.get(f.name).map(|v| (f, v))).collect();
    if changes.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }
    get_preferences(pool, user_id).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE user_preferences SET ");
    for (field, value) in &changes {
        qb.push(format!("\"{}\" = ", field.name));
        push_bind_field(&mut qb, field, value);
        qb.push(", ");
    }
    qb.push("updated_at = ").push_bind(db::now());
    qb.push(" WHERE user_id = ").push_bind(user_id.to_string());
    qb.build().execute(pool).await?;

    get_preferences(pool, user_id).await
}

/// Creates the configured bootstrap admin when no profile exists yet.
pub async fn ensure_bootstrap_admin(pool: &SqlitePool, cfg: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&cfg.bootstrap_admin_email, &cfg.bootstrap_admin_password) else {
        return Ok(());
    };
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles").fetch_one(pool).await?;
    if existing > 0 {
        tracing::debug!("Profiles present, skipping bootstrap admin");
        return Ok(());
    }

    let mut payload = Map::new();
    payload.insert("email".into(), Value::String(email.clone()));
    payload.insert("full_name".into(), Value::String("Administrator".into()));
    payload.insert("password".into(), Value::String(password.clone()));
    USER.validate(&payload, crate::schema::Mode::Create)
        .map_err(|e| anyhow::anyhow!("invalid bootstrap admin: {}", e))?;

    let user = NewUser { email: email.clone(), full_name: "Administrator".into(), password: password.clone(), role: Role::Admin };
    create_user(pool, user).await.map_err(|e| anyhow::anyhow!("failed to create bootstrap admin: {}", e))?;
    tracing::info!("Bootstrap admin {} created", email);
    Ok(())
}
