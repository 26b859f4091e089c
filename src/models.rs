use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub type Id = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[sqlx(type_name = "report_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Harassment,
    Safety,
    Ethics,
    Fraud,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Investigating,
    Pending,
    Resolved,
    Closed,
}

/// Raised when a string does not name a member of one of the closed enumerations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self { $($ty::$variant => $text),+ }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(Role, "role", { Admin => "admin", User => "user" });
string_enum!(Category, "category", {
    Harassment => "harassment",
    Safety => "safety",
    Ethics => "ethics",
    Fraud => "fraud",
    Other => "other",
});
string_enum!(Status, "status", {
    New => "new",
    Investigating => "investigating",
    Pending => "pending",
    Resolved => "resolved",
    Closed => "closed",
});

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    #[schema(skip)]
    pub password_hash: String, // argon2 PHC string, never leaves the server
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// A user row ready for insertion; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Id,
    #[serde(rename = "trackingId")]
    pub tracking_code: String,
    pub category: Category,
    pub description: String,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub anonymous: bool,
    pub attachment_ref: Option<String>,
    pub status: Status,
    pub assigned_to: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// The only projection an unauthenticated caller ever sees.
    pub fn public_view(&self) -> PublicReport {
        PublicReport {
            tracking_code: self.tracking_code.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicReport {
    #[serde(rename = "trackingId")]
    pub tracking_code: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

/// Submission payload for the public report endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub category: Category,
    #[validate(length(min = 1, max = 10000, message = "Description is required (max 10000 characters)"))]
    pub description: String,
    #[validate(length(max = 200, message = "Name must be at most 200 characters"))]
    pub reporter_name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub reporter_email: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(skip)]
    #[schema(skip)]
    pub attachment_ref: Option<String>,
}

impl NewReport {
    /// Trim free text and turn blank optional fields into `None` before validation.
    pub fn normalize(mut self) -> Self {
        self.description = self.description.trim().to_string();
        self.reporter_name = non_blank(self.reporter_name);
        self.reporter_email = non_blank(self.reporter_email);
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Default for Category {
    fn default() -> Self {
        Category::Other
    }
}

/// A validated report plus the tracking code chosen for it.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    pub tracking_code: String,
    pub report: NewReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: Status,
    pub assigned_to: Option<Id>,
}

/// Parsed `GET /api/cases` filters. `None` means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub search: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        if let Some(status) = self.status {
            if report.status != status {
                return false;
            }
        }
        if let Some(category) = self.category {
            if report.category != category {
                return false;
            }
        }
        match &self.search {
            Some(needle) => report.description.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CaseNote {
    pub id: Id,
    pub report_id: Id,
    pub note: String,
    pub author_id: Id,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewCaseNote {
    #[validate(length(min = 1, max = 5000, message = "Note is required (max 5000 characters)"))]
    pub note: String,
}

impl NewCaseNote {
    pub fn normalize(mut self) -> Self {
        self.note = self.note.trim().to_string();
        self
    }
}

/// Admin case view: every report field plus its notes, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseDetail {
    #[serde(flatten)]
    pub report: Report,
    pub assigned_to_username: Option<String>,
    pub notes: Vec<CaseNote>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: i64,
    pub new: i64,
    pub investigating: i64,
    pub pending: i64,
    pub resolved: i64,
    pub closed: i64,
    /// Reports still in status `new` that were created this calendar month.
    pub this_month: i64,
    /// Every report created this calendar month, whatever its status.
    pub created_this_month: i64,
}

impl ReportStats {
    /// Tally a set of reports against the month containing `now` (UTC).
    pub fn tally<'a>(reports: impl IntoIterator<Item = &'a Report>, now: DateTime<Utc>) -> Self {
        let month_start = month_start(now);
        let mut stats = ReportStats::default();
        for r in reports {
            stats.total += 1;
            match r.status {
                Status::New => stats.new += 1,
                Status::Investigating => stats.investigating += 1,
                Status::Pending => stats.pending += 1,
                Status::Resolved => stats.resolved += 1,
                Status::Closed => stats.closed += 1,
            }
            if r.created_at >= month_start {
                stats.created_this_month += 1;
                if r.status == Status::New {
                    stats.this_month += 1;
                }
            }
        }
        stats
    }
}

/// Midnight UTC on the first day of the month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{Datelike, TimeZone};
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub user_id: Id,
    pub expires_at: DateTime<Utc>,
}
