//! Credentials, sessions and the request guards built on them.
//!
//! A session is an opaque random token handed to the client (JSON body and
//! `sid` cookie). Only its SHA-256 is stored, so a leaked sessions table
//! cannot be replayed. Logging out deletes the row, which invalidates the
//! token immediately.

use std::time::Duration;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use futures_util::future::LocalBoxFuture;
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use validator::Validate;

use crate::config::{RegistrationPolicy, SeedAdmin};
use crate::error::ApiError;
use crate::models::{NewUser, Role, Session, User};
use crate::repo::{Repo, RepoError};
use crate::routes::AppState;

pub const SESSION_COOKIE: &str = "sid";

/// Hash a password using Argon2 with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!("failed to hash password: {e}");
            ApiError::Internal
        })
}

/// Verify a password against a stored PHC string. A malformed stored hash
/// counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("stored credential is not a valid PHC string: {e}");
            false
        }
    }
}

/// Verified against when the username is unknown, so both failure paths do
/// the same amount of work.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("casedesk-dummy-credential").unwrap_or_default());

/// Argon2 is deliberately slow, so hashing runs on the blocking pool.
async fn hash_off_thread(password: String) -> Result<String, ApiError> {
    web::block(move || hash_password(&password)).await.map_err(|e| {
        tracing::error!("password hashing task failed: {e}");
        ApiError::Internal
    })?
}

/// Verify on the blocking pool. `None` checks against the dummy hash.
async fn verify_off_thread(password: String, stored: Option<String>) -> Result<bool, ApiError> {
    web::block(move || verify_password(&password, stored.as_deref().unwrap_or(DUMMY_HASH.as_str())))
        .await
        .map_err(|e| {
            tracing::error!("password verification task failed: {e}");
            ApiError::Internal
        })
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Storage key for a token.
pub fn session_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issues, resolves and revokes sessions against the store.
pub struct SessionAuthority<'a> {
    repo: &'a dyn Repo,
    ttl: Duration,
}

impl<'a> SessionAuthority<'a> {
    pub fn new(repo: &'a dyn Repo, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    /// Start a session for `user`; returns the raw token. Sessions that
    /// have already expired are swept first.
    pub async fn issue(&self, user: &User) -> Result<String, ApiError> {
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|_| ApiError::Internal)?;
        let now = Utc::now();
        match self.repo.purge_expired_sessions(now).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "expired sessions removed"),
            Err(e) => tracing::warn!("could not purge expired sessions: {e}"),
        }
        let token = new_token();
        let session = Session { user_id: user.id, expires_at: now + ttl };
        self.repo.create_session(&session_key(&token), session).await?;
        Ok(token)
    }

    /// Check a username/password pair. Every failure is the same error.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, User), ApiError> {
        let user = match self.repo.get_user_by_username(username).await {
            Ok(u) => Some(u),
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let stored = user.as_ref().map(|u| u.password_hash.clone());
        let ok = verify_off_thread(password.to_string(), stored).await?;
        match user {
            Some(user) if ok => {
                let token = self.issue(&user).await?;
                Ok((token, user))
            }
            _ => {
                metrics::counter!("casedesk_login_failures_total").increment(1);
                Err(ApiError::InvalidCredentials)
            }
        }
    }

    /// Resolve a raw token to its user. Expired sessions are removed.
    pub async fn resolve(&self, token: &str) -> Result<(User, String), ApiError> {
        let key = session_key(token);
        let session = match self.repo.get_session(&key).await {
            Ok(s) => s,
            Err(RepoError::NotFound) => return Err(ApiError::Unauthorized),
            Err(e) => return Err(e.into()),
        };
        if session.expires_at <= Utc::now() {
            self.repo.delete_session(&key).await?;
            return Err(ApiError::Unauthorized);
        }
        match self.repo.get_user(session.user_id).await {
            Ok(user) => Ok((user, key)),
            Err(RepoError::NotFound) => Err(ApiError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn revoke(&self, key: &str) -> Result<(), ApiError> {
        self.repo.delete_session(key).await?;
        Ok(())
    }
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(actix_web::cookie::time::Duration::seconds(ttl.as_secs() as i64))
        .finish()
}

pub fn removal_cookie() -> Cookie<'static> {
    let mut c = Cookie::build(SESSION_COOKIE, "").path("/").http_only(true).finish();
    c.make_removal();
    c
}

/// Bearer header first, then the session cookie.
fn token_from_request(req: &HttpRequest) -> Option<String> {
    let mut pl = Payload::None;
    if let Ok(bearer) = BearerAuth::from_request(req, &mut pl).into_inner() {
        return Some(bearer.token().to_string());
    }
    req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()).filter(|v| !v.is_empty())
}

/// Extractor: a request bound to a live session.
#[derive(Debug, Clone)]
pub struct Auth {
    pub user: User,
    pub session_key: String,
}

impl Auth {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let token = token_from_request(req);
        let state = req.app_data::<web::Data<AppState>>().cloned();
        Box::pin(async move {
            let token = token.ok_or(ApiError::Unauthorized)?;
            let state = state.ok_or_else(|| {
                tracing::error!("AppState missing from app data");
                ApiError::Internal
            })?;
            let authority = SessionAuthority::new(state.repo.as_ref(), state.config.session_ttl);
            let (user, session_key) = authority.resolve(&token).await?;
            Ok(Auth { user, session_key })
        })
    }
}

/// Extractor: a live session whose user has the admin role. Guards every
/// case-management route.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub Auth);

impl FromRequest for AdminAuth {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let auth = Auth::from_request(req, pl);
        Box::pin(async move {
            let auth = auth.await?;
            if !auth.is_admin() {
                return Err(ApiError::Forbidden);
            }
            Ok(AdminAuth(auth))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, max = 1024, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Create an account, subject to the configured registration policy.
pub async fn register(
    repo: &dyn Repo,
    policy: RegistrationPolicy,
    role: Role,
    actor: Option<&Auth>,
    req: RegisterRequest,
) -> Result<User, ApiError> {
    let actor_is_admin = actor.map(Auth::is_admin).unwrap_or(false);
    let allowed = match policy {
        RegistrationPolicy::Open => true,
        RegistrationPolicy::Bootstrap => actor_is_admin || repo.count_users().await? == 0,
        RegistrationPolicy::AdminOnly => actor_is_admin,
    };
    if !allowed {
        return Err(match actor {
            None => ApiError::Unauthorized,
            Some(_) => ApiError::Forbidden,
        });
    }

    let req = RegisterRequest {
        username: req.username.trim().to_string(),
        email: req.email.trim().to_string(),
        password: req.password,
    };
    req.validate()?;
    create_user(repo, &req.username, &req.email, &req.password, role).await
}

async fn create_user(repo: &dyn Repo, username: &str, email: &str, password: &str, role: Role) -> Result<User, ApiError> {
    let new = NewUser {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: hash_off_thread(password.to_string()).await?,
        role,
    };
    match repo.create_user(new).await {
        Ok(user) => Ok(user),
        Err(RepoError::Conflict(field)) => Err(ApiError::field(&field, format!("This {field} is already taken"))),
        Err(e) => Err(e.into()),
    }
}

/// Make sure the configured bootstrap admin exists. Returns true when it was created.
pub async fn ensure_seed_admin(repo: &dyn Repo, seed: &SeedAdmin) -> Result<bool, ApiError> {
    match repo.get_user_by_username(&seed.username).await {
        Ok(_) => Ok(false),
        Err(RepoError::NotFound) => {
            create_user(repo, &seed.username, &seed.email, &seed.password, Role::Admin).await?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}
