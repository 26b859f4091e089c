//! Process-local backend used by the test-suite and `STORE_BACKEND=memory`.
//! One `RwLock` serialises every operation, so each call is atomic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::*;

#[derive(Debug, Clone)]
struct NoteRow {
    id: Id,
    report_id: Id,
    note: String,
    author_id: Id,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    users: HashMap<Id, User>,
    reports: Vec<Report>, // insertion order
    notes: Vec<NoteRow>,  // insertion order
    sessions: HashMap<String, Session>,
}

#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }
}

/// Newest first; among equal timestamps the later insertion wins.
fn newest_first<T, F>(rows: impl DoubleEndedIterator<Item = T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let mut v: Vec<T> = rows.rev().collect();
    v.sort_by(|a, b| created_at(b).cmp(&created_at(a))); // stable
    v
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        let mut s = self.write()?;
        if s.users.values().any(|u| u.username == new.username) {
            return Err(RepoError::Conflict("username".into()));
        }
        if s.users.values().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Err(RepoError::Conflict("email".into()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            created_at: Utc::now(),
        };
        s.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        self.read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn count_users(&self) -> RepoResult<i64> {
        Ok(self.read()?.users.len() as i64)
    }
}

#[async_trait]
impl ReportRepo for InMemRepo {
    async fn create_report(&self, draft: ReportDraft) -> RepoResult<Report> {
        let mut s = self.write()?;
        if s.reports.iter().any(|r| r.tracking_code == draft.tracking_code) {
            return Err(RepoError::Conflict("trackingId".into()));
        }
        let now = Utc::now();
        let new = draft.report;
        let report = Report {
            id: Uuid::new_v4(),
            tracking_code: draft.tracking_code,
            category: new.category,
            description: new.description,
            reporter_name: new.reporter_name,
            reporter_email: new.reporter_email,
            anonymous: new.anonymous,
            attachment_ref: new.attachment_ref,
            status: Status::New,
            assigned_to: None,
            created_at: now,
            updated_at: now,
        };
        s.reports.push(report.clone());
        Ok(report)
    }

    async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>> {
        let s = self.read()?;
        Ok(newest_first(
            s.reports.iter().filter(|r| filter.matches(r)).cloned(),
            |r| r.created_at,
        ))
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        self.read()?
            .reports
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_report_by_tracking_code(&self, code: &str) -> RepoResult<Report> {
        self.read()?
            .reports
            .iter()
            .find(|r| r.tracking_code == code)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update_report_status(&self, id: Id, status: Status, assigned_to: Option<Id>) -> RepoResult<Report> {
        let mut s = self.write()?;
        if let Some(uid) = assigned_to {
            if !s.users.contains_key(&uid) {
                return Err(RepoError::Conflict("assignedTo".into()));
            }
        }
        let report = s.reports.iter_mut().find(|r| r.id == id).ok_or(RepoError::NotFound)?;
        report.status = status;
        if assigned_to.is_some() {
            report.assigned_to = assigned_to;
        }
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn report_stats(&self, now: DateTime<Utc>) -> RepoResult<ReportStats> {
        Ok(ReportStats::tally(self.read()?.reports.iter(), now))
    }
}

#[async_trait]
impl CaseNoteRepo for InMemRepo {
    async fn create_case_note(&self, report_id: Id, note: &str, author_id: Id) -> RepoResult<CaseNote> {
        let mut s = self.write()?;
        if !s.reports.iter().any(|r| r.id == report_id) {
            return Err(RepoError::NotFound);
        }
        let author_username = s
            .users
            .get(&author_id)
            .map(|u| u.username.clone())
            .ok_or_else(|| RepoError::Internal(format!("note author {author_id} does not exist")))?;
        let row = NoteRow {
            id: Uuid::new_v4(),
            report_id,
            note: note.to_string(),
            author_id,
            created_at: Utc::now(),
        };
        s.notes.push(row.clone());
        Ok(CaseNote {
            id: row.id,
            report_id: row.report_id,
            note: row.note,
            author_id: row.author_id,
            author_username,
            created_at: row.created_at,
        })
    }

    async fn list_case_notes(&self, report_id: Id) -> RepoResult<Vec<CaseNote>> {
        let s = self.read()?;
        // Inner join semantics: notes whose author vanished are skipped.
        let joined = s.notes.iter().filter(|n| n.report_id == report_id).filter_map(|n| {
            s.users.get(&n.author_id).map(|u| CaseNote {
                id: n.id,
                report_id: n.report_id,
                note: n.note.clone(),
                author_id: n.author_id,
                author_username: u.username.clone(),
                created_at: n.created_at,
            })
        });
        let rows: Vec<CaseNote> = joined.collect();
        Ok(newest_first(rows.into_iter(), |n| n.created_at))
    }
}

#[async_trait]
impl SessionRepo for InMemRepo {
    async fn create_session(&self, key: &str, session: Session) -> RepoResult<()> {
        let mut s = self.write()?;
        if s.sessions.contains_key(key) {
            return Err(RepoError::Conflict("session".into()));
        }
        s.sessions.insert(key.to_string(), session);
        Ok(())
    }

    async fn get_session(&self, key: &str) -> RepoResult<Session> {
        self.read()?.sessions.get(key).copied().ok_or(RepoError::NotFound)
    }

    async fn delete_session(&self, key: &str) -> RepoResult<()> {
        self.write()?.sessions.remove(key);
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut s = self.write()?;
        let before = s.sessions.len();
        s.sessions.retain(|_, session| session.expires_at > now);
        Ok((before - s.sessions.len()) as u64)
    }
}

#[async_trait]
impl StoreHealth for InMemRepo {
    async fn ping(&self) -> RepoResult<()> {
        self.read().map(|_| ())
    }
}
