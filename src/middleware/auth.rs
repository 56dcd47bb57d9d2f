//! Caller identity.
//!
//! A request authenticates either with a session cookie (issued by `POST /api/auth/login`)
//! or with an `Authorization: Bearer vx_...` API key. Both resolve to a user id, and the
//! role always comes from the `profiles` row of that user.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header, HeaderMap, HeaderValue};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db;
use crate::error::{AppError, AppResult, OptionExt};

/// Prefix that marks a bearer token as an API key.
pub const API_KEY_PREFIX: &str = "vx_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Serialize)]
pub struct Caller {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see everything; everyone else only what they own.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.id == owner_id
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin access required".to_string()))
        }
    }

    pub fn require_owner(&self, owner_id: Uuid) -> AppResult<()> {
        if self.can_access(owner_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden("You do not have access to this resource".to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Session(String),
    ApiKey(String),
}

/// Finds the credential a request carries. A bearer token wins over the session cookie.
pub fn extract_credential(headers: &HeaderMap, cookie_name: &str) -> Option<Credential> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ").map(str::trim) {
            if token.is_empty() {
                return None;
            }
            if token.starts_with(API_KEY_PREFIX) {
                return Some(Credential::ApiKey(token.to_string()));
            }
            return Some(Credential::Session(token.to_string()));
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| Credential::Session(value.to_string()))
}

/// Resolves the caller of a request.
///
/// No credential, an unknown token, an expired session or a revoked key all yield
/// `401 Unauthorized`. A valid credential whose user has no profile row yields
/// `404 Not Found`.
pub async fn authenticate(pool: &SqlitePool, cfg: &AuthConfig, headers: &HeaderMap) -> AppResult<Caller> {
    let credential = extract_credential(headers, &cfg.session_cookie)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
    let now = db::now();

    let user_id: Option<String> = match credential {
        Credential::Session(token) => {
            sqlx::query_scalar("SELECT user_id FROM sessions WHERE token_hash = ? AND expires_at > ?")
                .bind(hash_token(&token))
                .bind(&now)
                .fetch_optional(pool)
                .await?
        }
        Credential::ApiKey(key) => {
            let row: Option<(String, String)> = sqlx::query_as(
                "SELECT id, owner_id FROM api_keys
                 WHERE key_hash = ? AND revoked_at IS NULL AND (expires_at IS NULL OR expires_at > ?)",
            )
            .bind(hash_token(&key))
            .bind(&now)
            .fetch_optional(pool)
            .await?;
            if let Some((key_id, _)) = &row {
                if let Err(e) =
                    sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?").bind(&now).bind(key_id).execute(pool).await
                {
                    tracing::warn!("Failed to record API key usage: {}", e);
                }
            }
            row.map(|(_, owner_id)| owner_id)
        }
    };

    let user_id = user_id.ok_or_else(|| AppError::Unauthorized("Invalid or expired credentials".to_string()))?;
    load_profile(pool, &user_id).await?.ok_or_not_found("Profile")
}

/// Reads the profile (identity and role) of `user_id`.
pub async fn load_profile(pool: &SqlitePool, user_id: &str) -> AppResult<Option<Caller>> {
    let row: Option<(String, String, String, String)> =
        sqlx::query_as("SELECT id, email, full_name, role FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    row.map(|(id, email, full_name, role)| -> AppResult<Caller> {
        let id = Uuid::parse_str(&id).map_err(|e| anyhow::anyhow!("corrupt profile id {}: {}", id, e))?;
        let role = Role::parse(&role).ok_or_else(|| anyhow::anyhow!("unknown role '{}' for profile {}", role, id))?;
        Ok(Caller { id, email, full_name, role })
    })
    .transpose()
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session tokens and API keys are stored as their SHA-256 digest only.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn session_cookie(cfg: &AuthConfig, token: &str) -> AppResult<HeaderValue> {
    build_cookie(cfg, token, cfg.session_ttl_secs)
}

pub fn clear_session_cookie(cfg: &AuthConfig) -> AppResult<HeaderValue> {
    build_cookie(cfg, "", 0)
}

fn build_cookie(cfg: &AuthConfig, value: &str, max_age: u64) -> AppResult<HeaderValue> {
    let secure = if cfg.secure_cookies { "; Secure" } else { "" };
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
        cfg.session_cookie, value, max_age, secure
    );
    HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(anyhow::anyhow!("invalid cookie value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extracts_api_key_and_session_tokens() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer vx_abc123")]);
        assert_eq!(extract_credential(&h, "vexis_session"), Some(Credential::ApiKey("vx_abc123".into())));

        let h = headers(&[(header::AUTHORIZATION, "Bearer deadbeef")]);
        assert_eq!(extract_credential(&h, "vexis_session"), Some(Credential::Session("deadbeef".into())));

        let h = headers(&[(header::COOKIE, "theme=dark; vexis_session=cafe01; other=1")]);
        assert_eq!(extract_credential(&h, "vexis_session"), Some(Credential::Session("cafe01".into())));
    }

    #[test]
    fn test_missing_or_empty_credentials() {
        assert_eq!(extract_credential(&HeaderMap::new(), "vexis_session"), None);
        let h = headers(&[(header::AUTHORIZATION, "Bearer   ")]);
        assert_eq!(extract_credential(&h, "vexis_session"), None);
        let h = headers(&[(header::COOKIE, "vexis_session=")]);
        assert_eq!(extract_credential(&h, "vexis_session"), None);
        let h = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwdw==")]);
        assert_eq!(extract_credential(&h, "vexis_session"), None);
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_tokens() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), "abc");
    }

    #[test]
    fn test_access_rules() {
        let owner = Uuid::new_v4();
        let user = Caller { id: owner, email: "u@vexis.example".into(), full_name: "U".into(), role: Role::User };
        let other = Caller { id: Uuid::new_v4(), ..user.clone() };
        let admin = Caller { id: Uuid::new_v4(), role: Role::Admin, ..user.clone() };

        assert!(user.require_owner(owner).is_ok());
        assert!(matches!(other.require_owner(owner), Err(AppError::Forbidden(_))));
        assert!(admin.require_owner(owner).is_ok());
        assert!(user.require_admin().is_err());
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let mut cfg = AuthConfig::default();
        let cookie = session_cookie(&cfg, "tok").unwrap();
        assert_eq!(cookie, "vexis_session=tok; Path=/; HttpOnly; SameSite=Strict; Max-Age=28800");

        cfg.secure_cookies = true;
        let cleared = clear_session_cookie(&cfg).unwrap();
        assert_eq!(cleared, "vexis_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0; Secure");
    }
}
