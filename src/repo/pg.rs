//! Postgres backend. Every operation is a single statement, so the database
//! provides the transaction boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::*;

const REPORT_COLUMNS: &str = "id, tracking_code, category, description, reporter_name, reporter_email, \
     anonymous, attachment_ref, status, assigned_to, created_at, updated_at";

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
    migrated: Arc<AtomicBool>,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool, migrated: Arc::new(AtomicBool::new(false)) }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::migrate::MigrateError::Execute(inner) => map_err(inner),
                other => RepoError::Internal(other.to_string()),
            })?;
        self.migrated.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::Acquire)
    }
}

/// Translate driver errors into the store taxonomy. Constraint names come
/// from the migrations.
fn map_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) => {
            let constraint = db.constraint().unwrap_or_default().to_string();
            if db.is_unique_violation() {
                let field = if constraint.contains("username") {
                    "username"
                } else if constraint.contains("email") {
                    "email"
                } else if constraint.contains("tracking_code") {
                    "trackingId"
                } else {
                    "session"
                };
                RepoError::Conflict(field.into())
            } else if db.is_foreign_key_violation() {
                if constraint.contains("assigned_to") {
                    RepoError::Conflict("assignedTo".into())
                } else {
                    // missing parent report (or author) behind a note
                    RepoError::NotFound
                }
            } else {
                RepoError::Internal(db.to_string())
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            RepoError::Unavailable(e.to_string())
        }
        other => RepoError::Internal(other.to_string()),
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1,$2,$3,$4,$5) \
             RETURNING id, username, email, password_hash, role, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>("SELECT id, username, email, password_hash, role, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>("SELECT id, username, email, password_hash, role, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn count_users(&self) -> RepoResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(n)
    }
}

#[async_trait]
impl ReportRepo for PgRepo {
    async fn create_report(&self, draft: ReportDraft) -> RepoResult<Report> {
        let new = draft.report;
        sqlx::query_as::<_, Report>(&format!(
            "INSERT INTO reports (id, tracking_code, category, description, reporter_name, reporter_email, anonymous, attachment_ref) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING {REPORT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.tracking_code)
        .bind(new.category)
        .bind(&new.description)
        .bind(&new.reporter_name)
        .bind(&new.reporter_email)
        .bind(new.anonymous)
        .bind(&new.attachment_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>> {
        // strpos keeps search a literal substring match (no LIKE wildcards).
        sqlx::query_as::<_, Report>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports \
             WHERE ($1::report_status IS NULL OR status = $1) \
               AND ($2::report_category IS NULL OR category = $2) \
               AND ($3::text IS NULL OR strpos(lower(description), lower($3)) > 0) \
             ORDER BY created_at DESC"
        ))
        .bind(filter.status)
        .bind(filter.category)
        .bind(filter.search.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn get_report_by_tracking_code(&self, code: &str) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!("SELECT {REPORT_COLUMNS} FROM reports WHERE tracking_code = $1"))
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn update_report_status(&self, id: Id, status: Status, assigned_to: Option<Id>) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(&format!(
            "UPDATE reports SET status = $2, assigned_to = COALESCE($3, assigned_to), updated_at = now() \
             WHERE id = $1 RETURNING {REPORT_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(assigned_to)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn report_stats(&self, now: DateTime<Utc>) -> RepoResult<ReportStats> {
        sqlx::query_as::<_, ReportStats>(
            r#"
            SELECT COUNT(*)                                                   AS total,
                   COUNT(*) FILTER (WHERE status = 'new')                     AS "new",
                   COUNT(*) FILTER (WHERE status = 'investigating')           AS investigating,
                   COUNT(*) FILTER (WHERE status = 'pending')                 AS pending,
                   COUNT(*) FILTER (WHERE status = 'resolved')                AS resolved,
                   COUNT(*) FILTER (WHERE status = 'closed')                  AS closed,
                   COUNT(*) FILTER (WHERE status = 'new' AND created_at >= $1) AS this_month,
                   COUNT(*) FILTER (WHERE created_at >= $1)                   AS created_this_month
            FROM reports
            "#,
        )
        .bind(month_start(now))
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }
}

#[async_trait]
impl CaseNoteRepo for PgRepo {
    async fn create_case_note(&self, report_id: Id, note: &str, author_id: Id) -> RepoResult<CaseNote> {
        sqlx::query_as::<_, CaseNote>(
            r#"
            WITH inserted AS (
                INSERT INTO case_notes (id, report_id, note, author_id) VALUES ($1,$2,$3,$4)
                RETURNING id, report_id, note, author_id, created_at
            )
            SELECT i.id, i.report_id, i.note, i.author_id, u.username AS author_username, i.created_at
            FROM inserted i JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(report_id)
        .bind(note)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_case_notes(&self, report_id: Id) -> RepoResult<Vec<CaseNote>> {
        sqlx::query_as::<_, CaseNote>(
            r#"
            SELECT n.id, n.report_id, n.note, n.author_id, u.username AS author_username, n.created_at
            FROM case_notes n
            JOIN users u ON u.id = n.author_id
            WHERE n.report_id = $1
            ORDER BY n.created_at DESC
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}

#[async_trait]
impl SessionRepo for PgRepo {
    async fn create_session(&self, key: &str, session: Session) -> RepoResult<()> {
        sqlx::query("INSERT INTO sessions (key, user_id, expires_at) VALUES ($1,$2,$3)")
            .bind(key)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_session(&self, key: &str) -> RepoResult<Session> {
        let (user_id, expires_at): (Id, DateTime<Utc>) =
            sqlx::query_as("SELECT user_id, expires_at FROM sessions WHERE key = $1")
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(Session { user_id, expires_at })
    }

    async fn delete_session(&self, key: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM sessions WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl StoreHealth for PgRepo {
    /// Reachable is not enough: until the schema is in place the store
    /// counts as down, and each ping retries the migrations.
    async fn ping(&self) -> RepoResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_err)?;
        if !self.is_migrated() {
            self.migrate().await.map_err(|e| RepoError::Unavailable(format!("schema not ready: {e}")))?;
            tracing::info!("schema migrations applied after start-up");
        }
        Ok(())
    }
}
