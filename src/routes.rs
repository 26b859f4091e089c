use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::http::header;
use actix_web::{guard, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt as _;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::attachments::Attachment;
use crate::auth::{self, AdminAuth, Auth, LoginRequest, RegisterRequest, SessionAuthority};
use crate::cases::{self, CaseQuery, ReportSubmission};
use crate::config::AppConfig;
use crate::error::{ApiError, FieldError};
use crate::models::*;
use crate::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use crate::repo::Repo;
use crate::storage::BlobStore;

/// Cap on each non-file multipart field.
const TEXT_FIELD_LIMIT: usize = 64 * 1024;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        // an id that is not a UUID cannot name anything
        .app_data(web::PathConfig::default().error_handler(|_, _| ApiError::NotFound.into()))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/reports")
                        .route(web::post().guard(guard::fn_guard(is_multipart)).to(submit_report_multipart))
                        .route(web::post().to(submit_report)),
                )
                .service(web::resource("/reports/track/{code}").route(web::get().to(track_report)))
                .service(web::resource("/health").route(web::get().to(health)))
                .service(web::resource("/register").route(web::post().to(register)))
                .service(web::resource("/login").route(web::post().to(login)))
                .service(web::resource("/logout").route(web::post().to(logout)))
                .service(web::resource("/user").route(web::get().to(current_user)))
                .service(web::resource("/cases").route(web::get().to(list_cases)))
                // registered before /cases/{id} so "stats" is never read as an id
                .service(web::resource("/cases/stats").route(web::get().to(case_stats)))
                .service(web::resource("/cases/{id}").route(web::get().to(get_case)))
                .service(web::resource("/cases/{id}/status").route(web::patch().to(update_case_status)))
                .service(web::resource("/cases/{id}/notes").route(web::post().to(add_case_note)))
                .service(web::resource("/cases/{id}/attachment").route(web::get().to(get_case_attachment))),
        );
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<AppConfig>,
    pub limiter: RateLimiterFacade,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, blobs: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        let limiter = RateLimiterFacade::new(
            InMemoryRateLimiter::new(config.rate_limit_enabled),
            config.rate_limits.clone(),
        );
        Self { repo, blobs, config: Arc::new(config), limiter, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let detail = match &err {
        JsonPayloadError::ContentType => "Expected an application/json body".to_string(),
        other => other.to_string(),
    };
    ApiError::validation("Malformed request body", vec![FieldError::new("body", detail)]).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::validation("Malformed query string", vec![FieldError::new("query", err.to_string())]).into()
}

fn is_multipart(ctx: &guard::GuardContext) -> bool {
    ctx.head()
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Rate-limit key. Forwarding headers are client-controlled, so they only
/// count when `TRUST_PROXY` says a proxy rewrites them.
fn client_ip(req: &HttpRequest, config: &AppConfig) -> String {
    if config.trust_proxy {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return addr.to_string();
        }
    }
    req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".into())
}

fn rate_limited(action: &'static str) -> ApiError {
    metrics::counter!("casedesk_rate_limited_total", "action" => action).increment(1);
    ApiError::RateLimited
}

// ---------------- Public ----------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReportResponse {
    pub tracking_id: String,
    pub message: String,
}

fn submitted(report: &Report) -> HttpResponse {
    HttpResponse::Created().json(SubmitReportResponse {
        tracking_id: report.tracking_code.clone(),
        message: "Report submitted successfully".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/reports",
    tag = "reports",
    request_body(content = ReportSubmission, description = "JSON body; multipart/form-data with an optional `file` part is also accepted"),
    responses(
        (status = 201, description = "Report accepted", body = SubmitReportResponse),
        (status = 400, description = "Validation failed", body = crate::error::ApiErrorBody),
        (status = 429, description = "Too many submissions")
    )
)]
pub async fn submit_report(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ReportSubmission>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_submission(&client_ip(&req, &data.config)) {
        return Err(rate_limited("submit"));
    }
    let report = payload.into_inner().into_report()?;
    let report = cases::submit_report(data.repo.as_ref(), data.blobs.as_ref(), report, None).await?;
    Ok(submitted(&report))
}

pub async fn submit_report_multipart(
    req: HttpRequest,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_submission(&client_ip(&req, &data.config)) {
        return Err(rate_limited("submit"));
    }

    let mut report = ReportSubmission::default();
    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(mut field) = payload.try_next().await.map_err(malformed_multipart)? {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.content_disposition().get_filename().unwrap_or_default().to_string();
                let bytes = read_capped(&mut field, data.config.max_upload_bytes)
                    .await?
                    .ok_or_else(|| {
                        ApiError::field("file", format!("File exceeds the {} byte limit", data.config.max_upload_bytes))
                    })?;
                // browsers send an empty, unnamed part when no file was chosen
                if !(file_name.is_empty() && bytes.is_empty()) {
                    file = Some((file_name, bytes));
                }
            }
            "category" | "description" | "reporterName" | "reporterEmail" | "anonymous" => {
                let raw = read_capped(&mut field, TEXT_FIELD_LIMIT)
                    .await?
                    .ok_or_else(|| ApiError::field(&name, "Value is too long"))?;
                let text = String::from_utf8(raw).map_err(|_| ApiError::field(&name, "Value must be UTF-8 text"))?;
                match name.as_str() {
                    "category" => report.category = Some(text),
                    "description" => report.description = text,
                    "reporterName" => report.reporter_name = Some(text),
                    "reporterEmail" => report.reporter_email = Some(text),
                    _ => report.anonymous = matches!(text.trim(), "true" | "on" | "1"),
                }
            }
            _ => continue,
        }
    }

    let report = report.into_report()?;
    let attachment = match file {
        Some((name, bytes)) => Some(Attachment::accept(&name, bytes, data.config.max_upload_bytes)?),
        None => None,
    };
    let report = cases::submit_report(data.repo.as_ref(), data.blobs.as_ref(), report, attachment).await?;
    Ok(submitted(&report))
}

/// `None` when the field is longer than `cap`.
async fn read_capped(field: &mut Field, cap: usize) -> Result<Option<Vec<u8>>, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(malformed_multipart)? {
        if buf.len() + chunk.len() > cap {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Some(buf))
}

fn malformed_multipart(e: actix_multipart::MultipartError) -> ApiError {
    tracing::debug!("multipart error: {e}");
    ApiError::validation("Malformed multipart body", vec![FieldError::new("body", e.to_string())])
}

#[utoipa::path(
    get,
    path = "/api/reports/track/{code}",
    tag = "reports",
    params(("code" = String, Path, description = "Tracking code, e.g. SR-2026-7K4QX9PM")),
    responses(
        (status = 200, description = "Public status of a report", body = PublicReport),
        (status = 404, description = "No report with that code", body = crate::error::ApiErrorBody),
        (status = 429, description = "Too many lookups")
    )
)]
pub async fn track_report(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_tracking(&client_ip(&req, &data.config)) {
        return Err(rate_limited("track"));
    }
    let view = cases::track_report(data.repo.as_ref(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// ok | degraded
    pub status: String,
    /// up | down
    pub store: String,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "ops",
    responses((status = 200, description = "Liveness and store reachability", body = HealthResponse))
)]
pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    let store_up = match data.repo.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("health check: store unreachable: {e}");
            false
        }
    };
    HttpResponse::Ok().json(HealthResponse {
        status: if store_up { "ok" } else { "degraded" }.into(),
        store: if store_up { "up" } else { "down" }.into(),
        timestamp: Utc::now(),
        environment: data.config.environment.clone(),
    })
}

pub async fn metrics_endpoint(data: web::Data<AppState>) -> HttpResponse {
    match &data.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

// ---------------- Sessions ----------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

fn with_session(mut resp: actix_web::HttpResponseBuilder, config: &AppConfig, token: String, user: User) -> HttpResponse {
    resp.cookie(auth::session_cookie(&token, config.session_ttl, config.session_cookie_secure))
        .json(AuthResponse { token, user })
}

#[utoipa::path(
    post,
    path = "/api/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Validation failed or username/email taken", body = crate::error::ApiErrorBody),
        (status = 401, description = "Registration requires an admin session"),
        (status = 403, description = "Caller is not an admin")
    )
)]
pub async fn register(
    actor: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let cfg = &data.config;
    let user = auth::register(
        data.repo.as_ref(),
        cfg.registration,
        cfg.registration_role,
        actor.as_ref(),
        payload.into_inner(),
    )
    .await?;
    tracing::info!(user_id = %user.id, role = %user.role, "user registered");
    let token = SessionAuthority::new(data.repo.as_ref(), cfg.session_ttl).issue(&user).await?;
    Ok(with_session(HttpResponse::Created(), cfg, token, user))
}

#[utoipa::path(
    post,
    path = "/api/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiErrorBody),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_login(&client_ip(&req, &data.config)) {
        return Err(rate_limited("login"));
    }
    let LoginRequest { username, password } = payload.into_inner();
    let authority = SessionAuthority::new(data.repo.as_ref(), data.config.session_ttl);
    let (token, user) = authority.login(username.trim(), &password).await?;
    tracing::info!(user_id = %user.id, "login");
    Ok(with_session(HttpResponse::Ok(), &data.config, token, user))
}

#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Session ended"),
        (status = 401, description = "No active session")
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    SessionAuthority::new(data.repo.as_ref(), data.config.session_ttl)
        .revoke(&auth.session_key)
        .await?;
    Ok(HttpResponse::Ok().cookie(auth::removal_cookie()).finish())
}

#[utoipa::path(
    get,
    path = "/api/user",
    tag = "auth",
    responses(
        (status = 200, description = "The signed-in user", body = User),
        (status = 401, description = "No active session")
    ),
    security(("bearer_auth" = []))
)]
pub async fn current_user(auth: Auth) -> HttpResponse {
    HttpResponse::Ok().json(auth.user)
}

// ---------------- Case management (admin) ----------------

#[utoipa::path(
    get,
    path = "/api/cases",
    tag = "cases",
    params(CaseQuery),
    responses(
        (status = 200, description = "Matching reports, newest first", body = [Report]),
        (status = 400, description = "Unknown filter value", body = crate::error::ApiErrorBody),
        (status = 401, description = "No active session"),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_cases(
    _admin: AdminAuth,
    data: web::Data<AppState>,
    query: web::Query<CaseQuery>,
) -> Result<HttpResponse, ApiError> {
    let reports = cases::list_cases(data.repo.as_ref(), query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    get,
    path = "/api/cases/stats",
    tag = "cases",
    responses(
        (status = 200, description = "Dashboard counters", body = ReportStats),
        (status = 401, description = "No active session"),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn case_stats(_admin: AdminAuth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(cases::case_stats(data.repo.as_ref()).await?))
}

#[utoipa::path(
    get,
    path = "/api/cases/{id}",
    tag = "cases",
    params(("id" = uuid::Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report with its notes", body = CaseDetail),
        (status = 404, description = "No such case", body = crate::error::ApiErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_case(
    _admin: AdminAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(cases::case_detail(data.repo.as_ref(), path.into_inner()).await?))
}

#[utoipa::path(
    patch,
    path = "/api/cases/{id}/status",
    tag = "cases",
    params(("id" = uuid::Uuid, Path, description = "Report id")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Updated report", body = Report),
        (status = 400, description = "Unknown status or assignee", body = crate::error::ApiErrorBody),
        (status = 404, description = "No such case", body = crate::error::ApiErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_case_status(
    AdminAuth(admin): AdminAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<StatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let report = cases::update_status(data.repo.as_ref(), path.into_inner(), payload.into_inner(), &admin.user).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    post,
    path = "/api/cases/{id}/notes",
    tag = "cases",
    params(("id" = uuid::Uuid, Path, description = "Report id")),
    request_body = NewCaseNote,
    responses(
        (status = 201, description = "Note added", body = CaseNote),
        (status = 400, description = "Empty note", body = crate::error::ApiErrorBody),
        (status = 404, description = "No such case", body = crate::error::ApiErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn add_case_note(
    AdminAuth(admin): AdminAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewCaseNote>,
) -> Result<HttpResponse, ApiError> {
    let note = cases::add_note(data.repo.as_ref(), path.into_inner(), payload.into_inner(), &admin.user).await?;
    Ok(HttpResponse::Created().json(note))
}

#[utoipa::path(
    get,
    path = "/api/cases/{id}/attachment",
    tag = "cases",
    params(("id" = uuid::Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Attachment bytes"),
        (status = 404, description = "No such case or no attachment", body = crate::error::ApiErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_case_attachment(
    _admin: AdminAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let report = data.repo.get_report(path.into_inner()).await?;
    let key = report.attachment_ref.ok_or(ApiError::NotFound)?;
    let blob = data.blobs.get(&key).await?;
    Ok(HttpResponse::Ok()
        .content_type(blob.content_type)
        .insert_header((header::CONTENT_DISPOSITION, format!("attachment; filename=\"{key}\"")))
        .body(blob.bytes))
}
