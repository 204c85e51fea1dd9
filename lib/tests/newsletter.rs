mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};

use common::{build_test_app, RecordingMailer, TestApp, ADMIN_TOKEN};
use mailroom::email::list::{self, SubscribeRequest};

async fn subscribe_many(app: &TestApp, emails: &[String]) {
    for email in emails {
        let (status, _) = app
            .post("/newsletter/subscribe", json!({ "email": email }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

async fn wait_until_sent(app: &TestApp, id: &str) -> Value {
    for _ in 0..200 {
        let (_, body) = app.admin_get(&format!("/newsletter/campaigns/{id}")).await;
        if body["data"]["status"] == "sent" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign {id} never finished sending");
}

#[tokio::test]
async fn resubscribing_reactivates_the_same_subscriber() {
    let app = build_test_app(RecordingMailer::default());

    let (status, body) = app
        .post("/newsletter/subscribe", json!({ "email": "A@x.com", "name": "A" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["email"], "a@x.com");

    let (status, _) = app
        .post("/newsletter/unsubscribe", json!({ "email": "a@x.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/newsletter/subscribe", json!({ "email": "a@x.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");

    let (_, body) = app.admin_get("/newsletter").await;
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["status"], "active");
    assert!(items[0]["unsubscribedAt"].is_null());
}

#[tokio::test]
async fn subscribe_validates_input_and_state() {
    let app = build_test_app(RecordingMailer::default());

    let (status, body) = app.post("/newsletter/subscribe", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .post("/newsletter/subscribe", json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    subscribe_many(&app, &["b@x.com".to_string()]).await;
    let (status, _) = app
        .post("/newsletter/subscribe", json!({ "email": "B@X.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/newsletter/unsubscribe", json!({ "email": "nobody@x.com" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.post("/newsletter/unsubscribe", json!({ "email": "b@x.com" }))
        .await;
    let (status, _) = app
        .post("/newsletter/unsubscribe", json!({ "email": "b@x.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subscribe_records_client_details() {
    let app = build_test_app(RecordingMailer::default());
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/newsletter/subscribe")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("user-agent", "integration-test")
        .body(axum::body::Body::from(json!({ "email": "c@x.com" }).to_string()))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let subscriber = list::find_by_email(&app.db, "c@x.com").unwrap().unwrap();
    assert_eq!(subscriber.ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(subscriber.user_agent.as_deref(), Some("integration-test"));
}

#[tokio::test]
async fn admin_routes_require_a_known_token() {
    let app = build_test_app(RecordingMailer::default());

    let (status, body) = app.call(Method::GET, "/newsletter", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .call(Method::GET, "/newsletter", Some("wrong"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::GET, "/newsletter", Some(ADMIN_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn subscriber_list_paginates() {
    let app = build_test_app(RecordingMailer::default());
    for i in 0..97 {
        list::subscribe(
            &app.db,
            SubscribeRequest {
                email: format!("s{i}@x.com"),
                ..Default::default()
            },
        )
        .unwrap();
    }

    let (status, body) = app.admin_get("/newsletter?page=5&limit=20").await;
    assert_eq!(status, StatusCode::OK);
    let pagination = &body["data"]["pagination"];
    assert_eq!(pagination["pages"], 5);
    assert_eq!(pagination["total"], 97);
    assert_eq!(pagination["current"], 5);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 17);

    let (_, body) = app.admin_get("/newsletter?page=0&limit=1000").await;
    assert_eq!(body["data"]["pagination"]["current"], 1);
    assert_eq!(body["data"]["pagination"]["limit"], 100);

    let (_, body) = app.admin_get("/newsletter?search=S42@").await;
    assert_eq!(body["data"]["pagination"]["total"], 1);

    let (status, _) = app.admin_get("/newsletter?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admins_can_change_status_and_delete() {
    let app = build_test_app(RecordingMailer::default());
    subscribe_many(&app, &["d@x.com".to_string()]).await;
    let id = list::find_by_email(&app.db, "d@x.com").unwrap().unwrap().id;

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("/newsletter/{id}/status"),
            Some(ADMIN_TOKEN),
            Some(json!({ "status": "bounced" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "bounced");

    let (status, _) = app
        .call(Method::DELETE, &format!("/newsletter/{id}"), Some(ADMIN_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(Method::DELETE, &format!("/newsletter/{id}"), Some(ADMIN_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::DELETE, "/newsletter/not-a-uuid", Some(ADMIN_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recent_audience_without_recent_subscribers_creates_nothing() {
    let app = build_test_app(RecordingMailer::default());
    let subscription = list::subscribe(
        &app.db,
        SubscribeRequest {
            email: "old@x.com".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    let mut old = subscription.subscriber().clone();
    old.subscribed_at = Utc::now() - chrono::Duration::days(45);
    app.db.set(&old).unwrap();

    let (status, body) = app
        .admin_post(
            "/newsletter/send-bulk-email",
            json!({
                "title": "Recent",
                "subject": "Hi",
                "content": "Hello",
                "targetAudience": "recent"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = app.admin_get("/newsletter/campaigns").await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn campaign_requires_title_subject_and_content() {
    let app = build_test_app(RecordingMailer::default());
    subscribe_many(&app, &["e@x.com".to_string()]).await;

    let (status, body) = app
        .admin_post(
            "/newsletter/send-bulk-email",
            json!({ "title": "T", "subject": " ", "content": "c" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("subject"));
}

#[tokio::test]
async fn campaign_isolates_a_failing_recipient() {
    let app = build_test_app(RecordingMailer::failing(&["r5@x.com"]));
    let emails = (0..12).map(|i| format!("r{i}@x.com")).collect::<Vec<_>>();
    subscribe_many(&app, &emails).await;

    let (status, body) = app
        .admin_post(
            "/newsletter/send-bulk-email",
            json!({
                "title": "Monthly",
                "subject": "News",
                "content": "Plain news",
                "htmlContent": "<html><body><p>News</p></body></html>",
                "targetAudience": "all"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "sending");
    assert_eq!(body["data"]["totalRecipients"], 12);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let campaign = wait_until_sent(&app, &id).await;
    assert_eq!(campaign["stats"]["sent"], 11);
    assert_eq!(campaign["stats"]["failed"], 1);
    assert_eq!(campaign["stats"]["totalRecipients"], 12);
    assert_eq!(campaign["sender"]["email"], common::ADMIN_EMAIL);

    let recipients = campaign["recipients"].as_array().unwrap();
    let failed = recipients
        .iter()
        .find(|r| r["email"] == "r5@x.com")
        .unwrap();
    assert_eq!(failed["status"], "failed");
    assert!(!failed["errorMessage"].as_str().unwrap().is_empty());

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 11);
    let html = sent[0].html.as_deref().unwrap();
    assert!(html.contains("https://app.institute.test/newsletter/track-email/"));

    let (_, body) = app.admin_get("/newsletter/campaigns?status=sent").await;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert!(body["data"]["items"][0].get("recipients").is_none());
}

#[tokio::test]
async fn future_campaigns_are_scheduled_not_sent() {
    let app = build_test_app(RecordingMailer::default());
    subscribe_many(&app, &["f@x.com".to_string()]).await;

    let at = Utc::now() + chrono::Duration::days(1);
    let (status, body) = app
        .admin_post(
            "/newsletter/send-bulk-email",
            json!({
                "title": "Tomorrow",
                "subject": "Soon",
                "content": "Later",
                "scheduledAt": at.to_rfc3339()
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "scheduled");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn stats_cover_subscribers_and_campaigns() {
    let app = build_test_app(RecordingMailer::default());
    subscribe_many(&app, &["g@x.com".to_string(), "h@x.com".to_string()]).await;
    app.post("/newsletter/unsubscribe", json!({ "email": "h@x.com" }))
        .await;

    let (status, body) = app.admin_get("/newsletter/stats").await;
    assert_eq!(status, StatusCode::OK);
    let subscribers = &body["data"]["subscribers"];
    assert_eq!(subscribers["total"], 2);
    assert_eq!(subscribers["active"], 1);
    assert_eq!(subscribers["unsubscribed"], 1);
    assert_eq!(subscribers["recent"], 1);
    assert_eq!(body["data"]["campaigns"]["total"], 0);
}
