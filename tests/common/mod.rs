#![allow(dead_code)]

use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{test, web};
use casedesk::repo::inmem::InMemRepo;
use casedesk::storage::FsBlobStore;
use casedesk::{AppConfig, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;

pub struct Harness {
    pub data: web::Data<AppState>,
    pub repo: InMemRepo,
    pub uploads: TempDir,
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// In-memory store, uploads in a fresh temp dir, rate limiting off unless `tweak` turns it on.
pub fn harness_with(tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let uploads = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::for_tests(uploads.path());
    tweak(&mut cfg);
    let repo = InMemRepo::new();
    let blobs = FsBlobStore::new(uploads.path());
    let state = AppState::new(Arc::new(repo.clone()), Arc::new(blobs), cfg);
    Harness { data: web::Data::new(state), repo, uploads }
}

/// Call the service and decode the body as JSON (`Null` when empty).
pub async fn send<S, R, B>(app: &S, req: R) -> (StatusCode, Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let body = test::read_body(resp).await;
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

pub fn register_req(username: &str, password: &str) -> test::TestRequest {
    test::TestRequest::post().uri("/api/register").set_json(json!({
        "username": username,
        "email": format!("{username}@example.com"),
        "password": password,
    }))
}

pub fn login_req(username: &str, password: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "username": username, "password": password }))
}

/// Register the first account (an admin under the default policy) and return its token.
pub async fn bootstrap_admin<S, B>(app: &S) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = send(app, register_req("admin", "correct horse battery").to_request()).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["role"], "admin");
    body["token"].as_str().unwrap().to_string()
}

pub fn report_req(body: Value) -> test::TestRequest {
    test::TestRequest::post().uri("/api/reports").set_json(body)
}

/// Submit a report and return its tracking code.
pub async fn submit<S, B>(app: &S, category: &str, description: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = send(
        app,
        report_req(json!({ "category": category, "description": description })).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["trackingId"].as_str().unwrap().to_string()
}

/// Look up a case id through the admin listing.
pub async fn case_id<S, B>(app: &S, token: &str, tracking_id: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let req = test::TestRequest::get().uri("/api/cases").insert_header(bearer(token)).to_request();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    body.as_array()
        .unwrap()
        .iter()
        .find(|c| c["trackingId"] == tracking_id)
        .map(|c| c["id"].as_str().unwrap().to_string())
        .unwrap()
}
