//! Report submission and case management, independent of HTTP.

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::attachments::Attachment;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::storage::BlobStore;
use crate::tracking;

/// Raw `GET /api/cases` query. `all` and blank values mean "no filter".
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CaseQuery {
    /// new | investigating | pending | resolved | closed | all
    pub status: Option<String>,
    /// harassment | safety | ethics | fraud | other | all
    pub category: Option<String>,
    /// Case-insensitive substring of the description
    pub search: Option<String>,
}

impl CaseQuery {
    pub fn into_filter(self) -> Result<ReportFilter, ApiError> {
        Ok(ReportFilter {
            status: parse_filter::<Status>("status", self.status)?,
            category: parse_filter::<Category>("category", self.category)?,
            search: self.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        })
    }
}

fn parse_filter<T>(field: &str, raw: Option<String>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let Some(raw) = raw else { return Ok(None) };
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    raw.parse::<T>().map(Some).map_err(|e| ApiError::field(field, e.to_string()))
}

/// Body of `POST /api/reports`. Category arrives as text so that a missing
/// or unknown value is reported against its own field.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSubmission {
    /// harassment | safety | ethics | fraud | other
    pub category: Option<String>,
    pub description: String,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub anonymous: bool,
}

impl ReportSubmission {
    pub fn into_report(self) -> Result<NewReport, ApiError> {
        let category = match self.category.as_deref().map(str::trim) {
            None | Some("") => return Err(ApiError::field("category", "Category is required")),
            Some(raw) => raw.parse::<Category>().map_err(|e| ApiError::field("category", e.to_string()))?,
        };
        Ok(NewReport {
            category,
            description: self.description,
            reporter_name: self.reporter_name,
            reporter_email: self.reporter_email,
            anonymous: self.anonymous,
            attachment_ref: None,
        })
    }
}

/// Validate and persist a new report, storing its attachment first when
/// one is supplied. Nothing is written when validation fails.
pub async fn submit_report(
    repo: &dyn Repo,
    blobs: &dyn BlobStore,
    report: NewReport,
    attachment: Option<Attachment>,
) -> Result<Report, ApiError> {
    submit_report_with(repo, blobs, report, attachment, tracking::generate).await
}

/// As [`submit_report`], drawing tracking codes from `next_code`.
pub async fn submit_report_with<F>(
    repo: &dyn Repo,
    blobs: &dyn BlobStore,
    report: NewReport,
    attachment: Option<Attachment>,
    mut next_code: F,
) -> Result<Report, ApiError>
where
    F: FnMut() -> String,
{
    let mut report = report.normalize();
    report.validate()?;
    if let Some(attachment) = attachment {
        report.attachment_ref = Some(attachment.store(blobs).await?);
    }

    for attempt in 1..=tracking::MAX_ATTEMPTS {
        let draft = ReportDraft { tracking_code: next_code(), report: report.clone() };
        match repo.create_report(draft).await {
            Ok(created) => {
                metrics::counter!("casedesk_reports_submitted_total", "category" => created.category.as_str())
                    .increment(1);
                info!(report_id = %created.id, category = %created.category, "report submitted");
                return Ok(created);
            }
            Err(RepoError::Conflict(field)) if field == "trackingId" => {
                warn!(attempt, "tracking code collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }
    error!(attempts = tracking::MAX_ATTEMPTS, "could not allocate a unique tracking code");
    Err(ApiError::Internal)
}

/// Public lookup. Malformed codes are reported as missing without a store round trip.
pub async fn track_report(repo: &dyn Repo, code: &str) -> Result<PublicReport, ApiError> {
    let code = code.trim();
    if !tracking::is_well_formed(code) {
        return Err(ApiError::NotFound);
    }
    Ok(repo.get_report_by_tracking_code(code).await?.public_view())
}

pub async fn list_cases(repo: &dyn Repo, query: CaseQuery) -> Result<Vec<Report>, ApiError> {
    let filter = query.into_filter()?;
    Ok(repo.list_reports(&filter).await?)
}

pub async fn case_stats(repo: &dyn Repo) -> Result<ReportStats, ApiError> {
    Ok(repo.report_stats(Utc::now()).await?)
}

pub async fn case_detail(repo: &dyn Repo, id: Id) -> Result<CaseDetail, ApiError> {
    let report = repo.get_report(id).await?;
    let notes = repo.list_case_notes(id).await?;
    let assigned_to_username = match report.assigned_to {
        Some(user_id) => match repo.get_user(user_id).await {
            Ok(u) => Some(u.username),
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    Ok(CaseDetail { report, assigned_to_username, notes })
}

/// Move a case to any status. The assignee only changes when one is given,
/// and it must name an existing user.
pub async fn update_status(repo: &dyn Repo, id: Id, update: StatusUpdate, actor: &User) -> Result<Report, ApiError> {
    if let Some(assignee) = update.assigned_to {
        match repo.get_user(assignee).await {
            Ok(_) => {}
            Err(RepoError::NotFound) => return Err(unknown_assignee()),
            Err(e) => return Err(e.into()),
        }
    }
    let updated = match repo.update_report_status(id, update.status, update.assigned_to).await {
        Ok(r) => r,
        Err(RepoError::Conflict(field)) if field == "assignedTo" => return Err(unknown_assignee()),
        Err(e) => return Err(e.into()),
    };
    info!(report_id = %id, status = %updated.status, by = %actor.username, "case status updated");
    Ok(updated)
}

fn unknown_assignee() -> ApiError {
    ApiError::field("assignedTo", "Assignee does not exist")
}

pub async fn add_note(repo: &dyn Repo, report_id: Id, note: NewCaseNote, author: &User) -> Result<CaseNote, ApiError> {
    let note = note.normalize();
    note.validate()?;
    let created = repo.create_case_note(report_id, &note.note, author.id).await?;
    info!(%report_id, note_id = %created.id, by = %author.username, "case note added");
    Ok(created)
}
