#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use mailroom::config::{Admin, Mailing};
use mailroom::email::Outgoing;
use mailroom::{Config, Database, ErrorKind, Mailer, Result};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const ADMIN_EMAIL: &str = "admin@institute.test";

/// Mail transport double recording every message it accepts.
#[derive(Default)]
pub struct RecordingMailer {
    pub fail: HashSet<String>,
    pub unreachable: bool,
    pub sent: Mutex<Vec<Outgoing>>,
}

impl RecordingMailer {
    pub fn failing(addresses: &[&str]) -> Self {
        Self {
            fail: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Outgoing> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: Outgoing) -> Result<String> {
        if self.unreachable || self.fail.contains(&message.to) {
            return Err(ErrorKind::EmailBadResponse("550 mailbox unavailable".to_string()).into());
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        Ok(format!("<{}@test>", sent.len()))
    }

    async fn verify(&self) -> Result<()> {
        if self.unreachable {
            return Err(ErrorKind::EmailBadResponse("connection refused".to_string()).into());
        }
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config {
        frontend_url: "https://app.institute.test".to_string(),
        mailing: Mailing {
            batch_size: 10,
            batch_delay_ms: 0,
            ..Default::default()
        },
        admins: vec![Admin {
            name: "Admin".to_string(),
            email: ADMIN_EMAIL.to_string(),
            token: ADMIN_TOKEN.to_string(),
        }],
        ..Default::default()
    };
    config.db.temporary = true;
    config.tracing.enabled = false;
    config
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub mailer: Arc<RecordingMailer>,
}

pub fn build_test_app(mailer: RecordingMailer) -> TestApp {
    build_test_app_with(mailer, test_config())
}

pub fn build_test_app_with(mailer: RecordingMailer, config: Config) -> TestApp {
    let db = Database::temporary().unwrap();
    let mailer = Arc::new(mailer);
    let router = mailroom::axum::app(Arc::new(config), db.clone(), mailer.clone());
    TestApp { router, db, mailer }
}

impl TestApp {
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn admin_get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(ADMIN_TOKEN), None).await
    }

    pub async fn admin_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(ADMIN_TOKEN), Some(body)).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None, Some(body)).await
    }
}
