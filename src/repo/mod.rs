use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    /// A unique constraint was hit; carries the offending field name.
    #[error("conflict on {0}")] Conflict(String),
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    async fn count_users(&self) -> RepoResult<i64>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    /// Fails with `Conflict("trackingId")` when the draft's code is taken.
    async fn create_report(&self, draft: ReportDraft) -> RepoResult<Report>;
    /// Newest first.
    async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>>;
    async fn get_report(&self, id: Id) -> RepoResult<Report>;
    async fn get_report_by_tracking_code(&self, code: &str) -> RepoResult<Report>;
    async fn update_report_status(&self, id: Id, status: Status, assigned_to: Option<Id>) -> RepoResult<Report>;
    async fn report_stats(&self, now: DateTime<Utc>) -> RepoResult<ReportStats>;
}

#[async_trait]
pub trait CaseNoteRepo: Send + Sync {
    /// Fails with `NotFound` when the parent report does not exist.
    async fn create_case_note(&self, report_id: Id, note: &str, author_id: Id) -> RepoResult<CaseNote>;
    /// Newest first, joined with the author's username.
    async fn list_case_notes(&self, report_id: Id) -> RepoResult<Vec<CaseNote>>;
}

/// Sessions are keyed by the SHA-256 of the bearer token, never the token itself.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn create_session(&self, key: &str, session: Session) -> RepoResult<()>;
    async fn get_session(&self, key: &str) -> RepoResult<Session>;
    async fn delete_session(&self, key: &str) -> RepoResult<()>;
    /// Drop every session with `expires_at <= now`; returns how many went.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> RepoResult<()>;
}

pub trait Repo: UserRepo + ReportRepo + CaseNoteRepo + SessionRepo + StoreHealth {}

impl<T> Repo for T where T: UserRepo + ReportRepo + CaseNoteRepo + SessionRepo + StoreHealth {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
