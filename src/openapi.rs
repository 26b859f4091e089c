use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::{LoginRequest, RegisterRequest};
use crate::cases::ReportSubmission;
use crate::error::{ApiErrorBody, FieldError};
use crate::models::{
    CaseDetail, CaseNote, Category, NewCaseNote, PublicReport, Report, ReportStats, Role, Status,
    StatusUpdate, User,
};
use crate::routes::{AuthResponse, HealthResponse, SubmitReportResponse};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::submit_report,
        crate::routes::track_report,
        crate::routes::health,
        crate::routes::register,
        crate::routes::login,
        crate::routes::logout,
        crate::routes::current_user,
        crate::routes::list_cases,
        crate::routes::case_stats,
        crate::routes::get_case,
        crate::routes::update_case_status,
        crate::routes::add_case_note,
        crate::routes::get_case_attachment,
    ),
    components(schemas(
        Report, PublicReport, ReportSubmission, Category, Status, Role, StatusUpdate,
        CaseDetail, CaseNote, NewCaseNote, ReportStats, User,
        RegisterRequest, LoginRequest, AuthResponse,
        SubmitReportResponse, HealthResponse, ApiErrorBody, FieldError,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "reports", description = "Anonymous report intake and tracking"),
        (name = "cases", description = "Case management, admin only"),
        (name = "auth", description = "Accounts and sessions"),
        (name = "ops", description = "Operational endpoints"),
    )
)]
pub struct ApiDoc;

/// Opaque session tokens are accepted as bearer credentials.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
