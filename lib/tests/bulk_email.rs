mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{build_test_app, RecordingMailer, TestApp, ADMIN_EMAIL};

async fn add_contact(app: &TestApp, email: &str, kind: &str) {
    let (status, _) = app
        .admin_post(
            "/bulk-email/contacts",
            json!({ "email": email, "name": email, "kind": kind }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn recipients_are_grouped_by_type() {
    let app = build_test_app(RecordingMailer::default());
    add_contact(&app, "s1@uni.edu", "Student").await;
    add_contact(&app, "s1@uni.edu", "Teacher").await;
    add_contact(&app, "hr@corp.com", "Company").await;
    app.post("/newsletter/subscribe", json!({ "email": "n@x.com" }))
        .await;

    let (status, body) = app.admin_get("/bulk-email/emails").await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["counts"]["Student"], 1);
    assert_eq!(data["counts"]["Teacher"], 1);
    assert_eq!(data["counts"]["Newsletter"], 1);
    assert_eq!(data["counts"]["College"], 0);
    assert_eq!(data["groups"]["Company"][0]["email"], "hr@corp.com");
    assert_eq!(data["total"], 3);
}

#[tokio::test]
async fn newsletter_contacts_are_rejected() {
    let app = build_test_app(RecordingMailer::default());
    let (status, _) = app
        .admin_post(
            "/bulk-email/contacts",
            json!({ "email": "x@x.com", "kind": "Newsletter" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_send_reports_results_and_logs_them() {
    let app = build_test_app(RecordingMailer::failing(&["bad@corp.com"]));
    add_contact(&app, "good@corp.com", "Company").await;
    add_contact(&app, "bad@corp.com", "Company").await;
    add_contact(&app, "dean@college.edu", "College").await;

    let (status, body) = app
        .admin_post(
            "/bulk-email/send",
            json!({
                "subject": "Placement drive",
                "htmlContent": "<p>Join us</p>",
                "recipientTypes": ["Company"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let report = &body["data"];
    assert_eq!(report["total"], 2);
    assert_eq!(report["success"], 1);
    assert_eq!(report["failure"], 1);
    let failed = report["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["email"] == "bad@corp.com")
        .unwrap();
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["type"], "Company");
    assert!(failed["error"].is_string());

    // no tracking pixel in the generic flow
    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].html.as_deref(), Some("<p>Join us</p>"));

    let log_id = report["logId"].as_str().unwrap();
    let (status, body) = app.admin_get(&format!("/bulk-email/logs/{log_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["successCount"], 1);
    assert_eq!(body["data"]["failureCount"], 1);
    assert_eq!(body["data"]["sentBy"]["email"], ADMIN_EMAIL);
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn bulk_send_without_recipients_is_rejected() {
    let app = build_test_app(RecordingMailer::default());
    let (status, body) = app
        .admin_post(
            "/bulk-email/send",
            json!({ "subject": "Hi", "textContent": "hello", "recipientTypes": ["College"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = app.admin_get("/bulk-email/logs").await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
}

#[tokio::test]
async fn bulk_send_requires_content() {
    let app = build_test_app(RecordingMailer::default());
    add_contact(&app, "a@corp.com", "Company").await;
    let (status, _) = app
        .admin_post("/bulk-email/send", json!({ "subject": "Empty" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_transport_fails_the_send() {
    let app = build_test_app(RecordingMailer {
        unreachable: true,
        ..Default::default()
    });
    add_contact(&app, "a@corp.com", "Company").await;

    let (status, body) = app
        .admin_post(
            "/bulk-email/send",
            json!({ "subject": "Hi", "textContent": "hello" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));

    let (_, body) = app.admin_get("/bulk-email/logs?status=failed").await;
    assert_eq!(body["data"]["pagination"]["total"], 1);

    let (status, body) = app.admin_get("/bulk-email/test-connection").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_connection_succeeds_with_working_transport() {
    let app = build_test_app(RecordingMailer::default());
    let (status, body) = app.admin_get("/bulk-email/test-connection").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_send_goes_to_the_admin_only() {
    let app = build_test_app(RecordingMailer::default());
    add_contact(&app, "a@corp.com", "Company").await;

    let (status, body) = app
        .admin_post(
            "/bulk-email/test-send",
            json!({ "subject": "Preview", "htmlContent": "<p>preview</p>" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ADMIN_EMAIL);
    assert_eq!(sent[0].subject, "[TEST] Preview");

    let (_, body) = app.admin_get("/bulk-email/logs?isTestEmail=true").await;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["isTestEmail"], true);
    let (_, body) = app.admin_get("/bulk-email/logs?isTestEmail=false").await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
}
