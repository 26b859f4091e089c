#![cfg(feature = "inmem-store")]

mod common;

use actix_web::http::StatusCode;
use actix_web::{test, App};
use casedesk::config::RegistrationPolicy;
use casedesk::models::Role;
use casedesk::{config, tracking, SecurityHeaders};
use chrono::{DateTime, Utc};
use common::*;
use serde_json::{json, Value};

#[actix_web::test]
async fn submit_track_and_triage_flow() {
    let h = harness();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(h.data.clone())
            .configure(config),
    )
    .await;
    let token = bootstrap_admin(&app).await;

    let (status, body) = send(
        &app,
        report_req(json!({
            "category": "safety",
            "description": "Unsafe scaffolding on floor 3",
            "anonymous": true
        }))
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Report submitted successfully");
    let code = body["trackingId"].as_str().unwrap().to_string();
    assert!(tracking::is_well_formed(&code), "{code}");

    let req = test::TestRequest::get().uri(&format!("/api/reports/track/{code}")).to_request();
    let (status, tracked) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tracked["trackingId"], code.as_str());
    assert_eq!(tracked["status"], "new");
    let created: DateTime<Utc> = tracked["createdAt"].as_str().unwrap().parse().unwrap();
    assert!((Utc::now() - created).num_seconds() < 60);

    let id = case_id(&app, &token, &code).await;
    actix_rt::time::sleep(std::time::Duration::from_millis(5)).await;
    let req = test::TestRequest::patch()
        .uri(&format!("/api/cases/{id}/status"))
        .insert_header(bearer(&token))
        .set_json(json!({ "status": "investigating" }))
        .to_request();
    let (status, updated) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["status"], "investigating");

    let req = test::TestRequest::get().uri(&format!("/api/cases/{id}")).insert_header(bearer(&token)).to_request();
    let (status, detail) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "investigating");
    assert_eq!(detail["trackingId"], code.as_str());
    assert_eq!(detail["notes"], json!([]));
    let created: DateTime<Utc> = detail["createdAt"].as_str().unwrap().parse().unwrap();
    let updated: DateTime<Utc> = detail["updatedAt"].as_str().unwrap().parse().unwrap();
    assert!(updated > created);
}

#[actix_web::test]
async fn public_view_never_carries_reporter_identity() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;

    let (status, body) = send(
        &app,
        report_req(json!({
            "category": "harassment",
            "description": "Repeated comments in the break room",
            "reporterName": "Jordan Doe",
            "reporterEmail": "jordan@example.com",
            "anonymous": true
        }))
        .to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = body["trackingId"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri(&format!("/api/reports/track/{code}")).to_request();
    let (_, tracked) = send(&app, req).await;
    let mut keys: Vec<&str> = tracked.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["createdAt", "status", "trackingId"]);

    // stored as supplied, visible to admins only
    let req = test::TestRequest::get().uri("/api/cases").insert_header(bearer(&token)).to_request();
    let (_, cases) = send(&app, req).await;
    assert_eq!(cases[0]["reporterName"], "Jordan Doe");
    assert_eq!(cases[0]["anonymous"], true);
}

#[actix_web::test]
async fn listing_filters_search_and_orders_newest_first() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;

    let first = submit(&app, "safety", "Broken LADDER in warehouse").await;
    let second = submit(&app, "fraud", "Expense claims look inflated").await;
    let third = submit(&app, "safety", "Missing guard rail near the ladder").await;

    let list = |query: &str| test::TestRequest::get().uri(&format!("/api/cases{query}")).insert_header(bearer(&token));

    let (_, all) = send(&app, list("?status=all&category=all").to_request()).await;
    let codes: Vec<&str> = all.as_array().unwrap().iter().map(|c| c["trackingId"].as_str().unwrap()).collect();
    assert_eq!(codes, [third.as_str(), second.as_str(), first.as_str()]);

    let (_, fraud) = send(&app, list("?category=fraud").to_request()).await;
    assert_eq!(fraud.as_array().unwrap().len(), 1);
    assert_eq!(fraud[0]["trackingId"], second.as_str());

    let (_, ladder) = send(&app, list("?search=%20ladder%20").to_request()).await;
    assert_eq!(ladder.as_array().unwrap().len(), 2);

    let (_, none) = send(&app, list("?category=safety&search=expense").to_request()).await;
    assert_eq!(none, json!([]));

    let (_, new_only) = send(&app, list("?status=new&search=").to_request()).await;
    assert_eq!(new_only.as_array().unwrap().len(), 3);

    let (status, err) = send(&app, list("?status=archived").to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "status");

    let (status, err) = send(&app, list("?category=weather").to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "category");
}

#[actix_web::test]
async fn invalid_submissions_are_rejected_and_not_stored() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;

    let (status, err) = send(&app, report_req(json!({ "category": "safety", "description": "   " })).to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_failed");
    assert_eq!(err["errors"][0]["field"], "description");

    let (status, err) = send(
        &app,
        report_req(json!({ "category": "other", "description": "x", "reporterEmail": "not-an-email" })).to_request(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "reporterEmail");

    let (status, err) = send(&app, report_req(json!({ "category": "weather", "description": "x" })).to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "category");

    let (status, err) = send(&app, report_req(json!({ "description": "x" })).to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "category");

    let (status, err) = send(&app, report_req(json!({ "category": "safety" })).to_request()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "description");

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let (status, err) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "body");

    let req = test::TestRequest::get().uri("/api/cases/stats").insert_header(bearer(&token)).to_request();
    let (_, stats) = send(&app, req).await;
    assert_eq!(stats["total"], 0);
}

#[actix_web::test]
async fn lookups_of_missing_things_are_404() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;

    for uri in ["/api/reports/track/nonsense", "/api/reports/track/SR-2026-ZZZZZZZZ"] {
        let (status, body) = send(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "not_found");
    }

    let missing = uuid::Uuid::new_v4();
    for uri in [format!("/api/cases/{missing}"), "/api/cases/not-a-uuid".to_string()] {
        let req = test::TestRequest::get().uri(&uri).insert_header(bearer(&token)).to_request();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }

    let req = test::TestRequest::patch()
        .uri(&format!("/api/cases/{missing}/status"))
        .insert_header(bearer(&token))
        .set_json(json!({ "status": "closed" }))
        .to_request();
    assert_eq!(send(&app, req).await.0, StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri(&format!("/api/cases/{missing}/notes"))
        .insert_header(bearer(&token))
        .set_json(json!({ "note": "orphan" }))
        .to_request();
    assert_eq!(send(&app, req).await.0, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn admin_routes_require_an_admin_session() {
    let h = harness_with(|cfg| {
        cfg.registration = RegistrationPolicy::Open;
        cfg.registration_role = Role::User;
    });
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let code = submit(&app, "ethics", "Gifts from a supplier").await;

    for uri in ["/api/cases", "/api/cases/stats"] {
        let (status, body) = send(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["error"], "unauthorized");

        let req = test::TestRequest::get().uri(uri).insert_header(bearer("bogus-token")).to_request();
        assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = send(&app, register_req("investigator", "long enough pw").to_request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "user");
    let user_token = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri("/api/cases").insert_header(bearer(&user_token)).to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // tracking stays public
    let req = test::TestRequest::get().uri(&format!("/api/reports/track/{code}")).to_request();
    assert_eq!(send(&app, req).await.0, StatusCode::OK);
}

#[actix_web::test]
async fn case_actions_without_a_session_are_unauthorized() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;
    let code = submit(&app, "safety", "Fire exit blocked by pallets").await;
    let id = case_id(&app, &token, &code).await;

    let requests = [
        test::TestRequest::get().uri(&format!("/api/cases/{id}")),
        test::TestRequest::patch().uri(&format!("/api/cases/{id}/status")).set_json(json!({ "status": "resolved" })),
        test::TestRequest::post().uri(&format!("/api/cases/{id}/notes")).set_json(json!({ "note": "sneaky" })),
    ];
    for req in requests {
        let (status, body) = send(&app, req.to_request()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    let req = test::TestRequest::get().uri(&format!("/api/cases/{id}")).insert_header(bearer(&token)).to_request();
    let (_, detail) = send(&app, req).await;
    assert_eq!(detail["status"], "new");
    assert!(detail["notes"].as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn resolving_twice_leaves_the_same_terminal_state() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;
    let code = submit(&app, "harassment", "Repeated comments in stand-up").await;
    let id = case_id(&app, &token, &code).await;

    let mut seen = Vec::new();
    for _ in 0..2 {
        let req = test::TestRequest::patch()
            .uri(&format!("/api/cases/{id}/status"))
            .insert_header(bearer(&token))
            .set_json(json!({ "status": "resolved" }))
            .to_request();
        let (status, report) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "{report}");
        seen.push(report);
    }
    for report in &seen {
        assert_eq!(report["status"], "resolved");
        assert_eq!(report["assignedTo"], Value::Null);
        assert_eq!(report["trackingId"], code.as_str());
    }

    let req = test::TestRequest::get().uri(&format!("/api/reports/track/{code}")).to_request();
    let (_, public) = send(&app, req).await;
    assert_eq!(public["status"], "resolved");
}

#[actix_web::test]
async fn notes_are_attributed_and_listed_newest_first() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;
    let code = submit(&app, "other", "Parking lot lights are out").await;
    let id = case_id(&app, &token, &code).await;

    for text in ["  Called facilities  ", "Lights replaced"] {
        let req = test::TestRequest::post()
            .uri(&format!("/api/cases/{id}/notes"))
            .insert_header(bearer(&token))
            .set_json(json!({ "note": text }))
            .to_request();
        let (status, note) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{note}");
        assert_eq!(note["authorUsername"], "admin");
        assert_eq!(note["note"], text.trim());
    }

    let req = test::TestRequest::post()
        .uri(&format!("/api/cases/{id}/notes"))
        .insert_header(bearer(&token))
        .set_json(json!({ "note": " \n " }))
        .to_request();
    let (status, err) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "note");

    let req = test::TestRequest::get().uri(&format!("/api/cases/{id}")).insert_header(bearer(&token)).to_request();
    let (_, detail) = send(&app, req).await;
    let notes = detail["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0]["note"], "Lights replaced");
    assert_eq!(notes[1]["note"], "Called facilities");
}

#[actix_web::test]
async fn status_updates_validate_and_record_the_assignee() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;
    let code = submit(&app, "fraud", "Duplicate invoices from vendor").await;
    let id = case_id(&app, &token, &code).await;

    let req = test::TestRequest::get().uri("/api/user").insert_header(bearer(&token)).to_request();
    let (_, me) = send(&app, req).await;
    let admin_id = me["id"].as_str().unwrap().to_string();

    let patch = |body: serde_json::Value| {
        test::TestRequest::patch()
            .uri(&format!("/api/cases/{id}/status"))
            .insert_header(bearer(&token))
            .set_json(body)
            .to_request()
    };

    let (status, err) = send(&app, patch(json!({ "status": "pending", "assignedTo": uuid::Uuid::new_v4() }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errors"][0]["field"], "assignedTo");

    let (status, _) = send(&app, patch(json!({ "status": "finished" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = send(&app, patch(json!({ "status": "pending", "assignedTo": &admin_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["assignedTo"], admin_id.as_str());

    // closing without naming an assignee keeps the current one; any status may follow any other
    let (_, report) = send(&app, patch(json!({ "status": "closed" }))).await;
    assert_eq!(report["status"], "closed");
    assert_eq!(report["assignedTo"], admin_id.as_str());
    let (_, report) = send(&app, patch(json!({ "status": "new" }))).await;
    assert_eq!(report["status"], "new");

    let req = test::TestRequest::get().uri(&format!("/api/cases/{id}")).insert_header(bearer(&token)).to_request();
    let (_, detail) = send(&app, req).await;
    assert_eq!(detail["assignedToUsername"], "admin");
}

#[actix_web::test]
async fn stats_buckets_sum_to_total() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let token = bootstrap_admin(&app).await;
    let mut ids = Vec::new();
    for i in 0..4 {
        let code = submit(&app, "safety", &format!("Hazard number {i}")).await;
        ids.push(case_id(&app, &token, &code).await);
    }
    for (id, status) in ids.iter().zip(["investigating", "resolved", "closed"]) {
        let req = test::TestRequest::patch()
            .uri(&format!("/api/cases/{id}/status"))
            .insert_header(bearer(&token))
            .set_json(json!({ "status": status }))
            .to_request();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
    }

    let req = test::TestRequest::get().uri("/api/cases/stats").insert_header(bearer(&token)).to_request();
    let (status, stats) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 4);
    assert_eq!(stats["new"], 1);
    assert_eq!(stats["investigating"], 1);
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["resolved"], 1);
    assert_eq!(stats["closed"], 1);
    assert_eq!(stats["thisMonth"], 1);
    assert_eq!(stats["createdThisMonth"], 4);
}

#[actix_web::test]
async fn health_reports_store_and_environment() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let (status, body) = send(&app, test::TestRequest::get().uri("/api/health").to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "up");
    assert_eq!(body["environment"], h.data.config.environment.as_str());
    assert!(body["timestamp"].is_string());
}

#[actix_web::test]
async fn metrics_endpoint_is_absent_when_disabled() {
    let h = harness();
    let app = test::init_service(App::new().app_data(h.data.clone()).configure(config)).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
