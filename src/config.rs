//! Process configuration, read once from the environment at start-up.
//!
//! Parsing goes through [`AppConfig::from_lookup`] so tests can feed a plain
//! map instead of mutating the process environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Role;
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Fs,
    S3,
}

/// Who may call `POST /api/register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// Anyone, unauthenticated.
    Open,
    /// Anyone while no user exists; afterwards an admin session is required.
    Bootstrap,
    /// Always an admin session. The first admin comes from `SEED_ADMIN_*`.
    AdminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub environment: String,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub session_ttl: Duration,
    pub session_cookie_secure: bool,
    pub registration: RegistrationPolicy,
    pub registration_role: Role,
    pub seed_admin: Option<SeedAdmin>,
    pub storage: StorageBackend,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub s3: S3Config,
    pub frontend_url: Option<String>,
    pub enable_hsts: bool,
    /// Key rate limits on `Forwarded`/`X-Forwarded-For`. Only safe behind a proxy that overwrites them.
    pub trust_proxy: bool,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
    pub metrics_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get("STORE_BACKEND").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => return Err(invalid("STORE_BACKEND", other, "expected postgres or memory")),
        };
        let database_url = get("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        let storage = match get("STORAGE_BACKEND").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("fs") => StorageBackend::Fs,
            Some("s3") => StorageBackend::S3,
            Some(other) => return Err(invalid("STORAGE_BACKEND", other, "expected fs or s3")),
        };

        let registration = match get("REGISTRATION_POLICY").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("bootstrap") => RegistrationPolicy::Bootstrap,
            Some("open") => RegistrationPolicy::Open,
            Some("admin-only") | Some("admin_only") => RegistrationPolicy::AdminOnly,
            Some(other) => return Err(invalid("REGISTRATION_POLICY", other, "expected open, bootstrap or admin-only")),
        };
        let registration_role = match get("REGISTRATION_ROLE") {
            None => Role::Admin,
            Some(v) => v.parse().map_err(|e: crate::models::UnknownVariant| invalid("REGISTRATION_ROLE", &v, &e.to_string()))?,
        };

        let seed_admin = match (get("SEED_ADMIN_USERNAME"), get("SEED_ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(SeedAdmin {
                email: get("SEED_ADMIN_EMAIL").unwrap_or_else(|| format!("{username}@localhost")),
                username,
                password,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing { key: "SEED_ADMIN_PASSWORD" }),
            (None, Some(_)) => return Err(ConfigError::Missing { key: "SEED_ADMIN_USERNAME" }),
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            environment: get("APP_ENV").unwrap_or_else(|| "development".into()),
            store,
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
            session_ttl: Duration::from_secs(parse_or::<u64, _>(&get, "SESSION_TTL_HOURS", 24)? * 3600),
            session_cookie_secure: flag(&get, "SESSION_COOKIE_SECURE", false)?,
            registration,
            registration_role,
            seed_admin,
            storage,
            upload_dir: get("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("uploads")),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            s3: S3Config {
                bucket: get("S3_BUCKET").unwrap_or_else(|| "casedesk-attachments".into()),
                endpoint: get("S3_ENDPOINT"),
                region: get("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: get("S3_ACCESS_KEY"),
                secret_key: get("S3_SECRET_KEY"),
            },
            frontend_url: get("FRONTEND_URL"),
            enable_hsts: flag(&get, "ENABLE_HSTS", false)?,
            trust_proxy: flag(&get, "TRUST_PROXY", false)?,
            rate_limit_enabled: flag(&get, "RATE_LIMIT_ENABLED", true)?,
            rate_limits: RateLimitConfig {
                submit_limit: parse_or(&get, "RL_SUBMIT_LIMIT", 5)?,
                submit_window: Duration::from_secs(parse_or(&get, "RL_SUBMIT_WINDOW", 600)?),
                track_limit: parse_or(&get, "RL_TRACK_LIMIT", 30)?,
                track_window: Duration::from_secs(parse_or(&get, "RL_TRACK_WINDOW", 60)?),
                login_limit: parse_or(&get, "RL_LOGIN_LIMIT", 10)?,
                login_window: Duration::from_secs(parse_or(&get, "RL_LOGIN_WINDOW", 900)?),
            },
            metrics_enabled: flag(&get, "METRICS_ENABLED", true)?,
        })
    }

    /// Settings suitable for tests and local runs: in-memory store, local
    /// uploads under `upload_dir`, rate limiting off.
    pub fn for_tests(upload_dir: impl Into<PathBuf>) -> Self {
        let mut map = HashMap::new();
        map.insert("STORE_BACKEND", "memory");
        map.insert("RATE_LIMIT_ENABLED", "false");
        map.insert("METRICS_ENABLED", "false");
        let mut cfg = Self::from_map(&map).unwrap_or_else(|e| panic!("test config: {e}"));
        cfg.upload_dir = upload_dir.into();
        cfg
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { key, value: value.to_string(), reason: reason.to_string() }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| invalid(key, &v, &e.to_string())),
    }
}

fn flag<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "1" || v == "true" || v == "yes" => Ok(true),
        Some(v) if v == "0" || v == "false" || v == "no" => Ok(false),
        Some(v) => Err(invalid(key, &v, "expected a boolean")),
    }
}
