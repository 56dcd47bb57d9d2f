use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Name of the cookie carrying the session token.
    pub session_cookie: String,
    pub session_ttl_secs: u64,
    /// Adds `Secure` to the session cookie. Enable behind TLS.
    pub secure_cookies: bool,
    /// Admin account created on startup when no profile exists yet.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

/// Window and quota for one rate-limit tier.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl TierConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub sweep_interval_secs: u64,
    pub auth: TierConfig,
    pub write: TierConfig,
    pub read: TierConfig,
    pub user: TierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanitizeConfig {
    /// Strings longer than this many characters are truncated.
    pub max_string_length: usize,
    /// Ceiling for the serialized request body, in KiB.
    pub max_payload_kb: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Also write entries to the `audit_logs` table.
    pub persist: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitSettings,
    pub sanitize: SanitizeConfig,
    pub audit: AuditConfig,
    pub security: Option<SecurityConfig>,
}

// Mirrors config/default.toml so tests and tools can build a config without touching the filesystem.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "127.0.0.1".into(), port: 8080 },
            database: DatabaseConfig { url: "sqlite://data/vexis.db".into() },
            auth: AuthConfig::default(),
            rate_limit: RateLimitSettings::default(),
            sanitize: SanitizeConfig::default(),
            audit: AuditConfig { persist: true },
            security: Some(SecurityConfig {
                enable_hsts: Some(false),
                hsts_max_age: Some(31_536_000),
                hsts_include_subdomains: Some(false),
                csp: Some(DEFAULT_CSP.to_string()),
            }),
        }
    }
}

pub const DEFAULT_CSP: &str = "default-src 'self'; frame-ancestors 'none'; object-src 'none'; base-uri 'self'";

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: "vexis_session".into(),
            session_ttl_secs: 8 * 60 * 60,
            secure_cookies: false,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            auth: TierConfig { window_secs: 15 * 60, max_requests: 5 },
            write: TierConfig { window_secs: 60, max_requests: 30 },
            read: TierConfig { window_secs: 60, max_requests: 100 },
            user: TierConfig { window_secs: 60, max_requests: 120 },
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self { max_string_length: 10_000, max_payload_kb: 100, max_depth: 16 }
    }
}

const DEFAULTS: &str = include_str!("../config/default.toml");

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: vexis.toml (in CWD)
        .add_source(::config::File::with_name("vexis").required(false));

    if let Ok(custom_path) = std::env::var("VEXIS_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("VEXIS").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

/// Parses a TOML document layered over the embedded defaults, without env or file lookups.
pub fn from_toml(overrides: &str) -> anyhow::Result<AppConfig> {
    let cfg = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        .add_source(::config::File::from_str(overrides, ::config::FileFormat::Toml))
        .build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    // Warn for privileged ports on Unix-like systems
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Auth
    if cfg.auth.session_cookie.trim().is_empty() {
        return Err(anyhow::anyhow!("auth.session_cookie must not be empty"));
    }
    if cfg.auth.session_ttl_secs == 0 {
        return Err(anyhow::anyhow!("auth.session_ttl_secs must be > 0"));
    }
    if cfg.auth.bootstrap_admin_email.is_some() != cfg.auth.bootstrap_admin_password.is_some() {
        return Err(anyhow::anyhow!(
            "auth.bootstrap_admin_email and auth.bootstrap_admin_password must be set together"
        ));
    }

    // Rate limiting
    if cfg.rate_limit.sweep_interval_secs == 0 {
        return Err(anyhow::anyhow!("rate_limit.sweep_interval_secs must be > 0"));
    }
    for (name, tier) in [
        ("auth", &cfg.rate_limit.auth),
        ("write", &cfg.rate_limit.write),
        ("read", &cfg.rate_limit.read),
        ("user", &cfg.rate_limit.user),
    ] {
        if tier.window_secs == 0 {
            return Err(anyhow::anyhow!("rate_limit.{}.window_secs must be > 0", name));
        }
        if tier.max_requests == 0 {
            return Err(anyhow::anyhow!("rate_limit.{}.max_requests must be > 0", name));
        }
    }

    // Sanitizer
    if cfg.sanitize.max_string_length == 0 {
        return Err(anyhow::anyhow!("sanitize.max_string_length must be > 0"));
    }
    if cfg.sanitize.max_payload_kb == 0 {
        return Err(anyhow::anyhow!("sanitize.max_payload_kb must be > 0"));
    }
    if cfg.sanitize.max_depth == 0 || cfg.sanitize.max_depth > 128 {
        return Err(anyhow::anyhow!("sanitize.max_depth must be in 1..=128"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // sqlite::memory: and friends have no parent directory to create
        if path.is_empty() || path.starts_with(':') {
            return Ok(());
        }
        let path = path.split('?').next().unwrap_or(path);
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
