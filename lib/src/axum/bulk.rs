//! Generic bulk email to typed directory recipients.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Extension;
use http::StatusCode;
use uuid::Uuid;

use crate::audience::{self, Target};
use crate::directory::RecipientType;
use crate::email_log::{self, EmailLog, NewEmailLog};
use crate::query::ListQuery;
use crate::{routes, util, Contact, ErrorKind, Result};

use super::extract::{Body, Id, Params};
use super::{Admin, ConfigExt, DbExt, MailerExt, Reply, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::BULK_EMAILS, get(emails))
        .route(routes::BULK_CONTACTS, post(add_contact))
        .route(routes::BULK_SEND, post(send))
        .route(routes::BULK_TEST_SEND, post(test_send))
        .route(routes::BULK_TEST_CONNECTION, get(test_connection))
        .route(routes::BULK_LOGS, get(logs))
        .route(routes::BULK_LOG, get(log))
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipients {
    pub groups: BTreeMap<RecipientType, Vec<Target>>,
    pub counts: BTreeMap<RecipientType, usize>,
    /// Unique addresses over all groups.
    pub total: usize,
}

/// Lists every addressable recipient, grouped by type.
pub async fn emails(_: Admin, Extension(db): DbExt) -> Result<impl IntoResponse> {
    let groups = audience::grouped(&db, &RecipientType::all())?;
    let counts = groups.iter().map(|(k, v)| (*k, v.len())).collect();
    let total = groups
        .values()
        .flatten()
        .map(|t| t.email.to_lowercase())
        .collect::<HashSet<_>>()
        .len();
    Ok(Reply::data(Recipients {
        groups,
        counts,
        total,
    }))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContactBody {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "type")]
    pub kind: RecipientType,
}

pub async fn add_contact(
    _: Admin,
    Extension(db): DbExt,
    Body(body): Body<ContactBody>,
) -> Result<impl IntoResponse> {
    let contact = Contact::upsert(&db, &body.email, &body.name, body.kind)?;
    Ok(Reply::created(contact).message("Contact saved"))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendBody {
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub recipient_types: Option<Vec<RecipientType>>,
}

fn content(
    html: Option<String>,
    text: Option<String>,
) -> Result<(Option<String>, Option<String>)> {
    let html = html.filter(|h| !h.trim().is_empty());
    let text = text.filter(|t| !t.trim().is_empty());
    if html.is_none() && text.is_none() {
        return Err(ErrorKind::BadInput("email content is required".to_string()).into());
    }
    Ok((html, text))
}

/// Sends to every recipient of the requested types and reports the results
/// once the whole job is done.
pub async fn send(
    admin: Admin,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
    Extension(mailer): MailerExt,
    Body(body): Body<SendBody>,
) -> Result<impl IntoResponse> {
    let subject = util::required("subject", &body.subject)?;
    let (html_content, text_content) = content(body.html_content, body.text_content)?;
    let kinds = match body.recipient_types {
        Some(kinds) if !kinds.is_empty() => kinds,
        _ => RecipientType::all(),
    };

    let targets = audience::collect_typed(&db, &kinds)?;
    tracing::info!(admin = %admin.email, recipients = targets.len(), "starting bulk send");

    let report = email_log::send(
        &db,
        mailer,
        &config,
        NewEmailLog {
            subject,
            html_content,
            text_content,
            recipient_types: kinds.into_iter().collect::<BTreeSet<_>>(),
            sent_by: (&admin.0).into(),
            is_test_email: false,
        },
        &targets,
    )
    .await?;

    let message = format!(
        "Sent {} of {} emails, {} failed",
        report.success, report.total, report.failure
    );
    Ok(Reply::data(report).message(message))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestSendBody {
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
}

/// Sends a single copy to the requesting admin.
pub async fn test_send(
    admin: Admin,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
    Extension(mailer): MailerExt,
    Body(body): Body<TestSendBody>,
) -> Result<impl IntoResponse> {
    let subject = util::required("subject", &body.subject)?;
    let (html_content, text_content) = content(body.html_content, body.text_content)?;
    let to = util::normalize_email(&admin.email)?;

    let report = email_log::send(
        &db,
        mailer,
        &config,
        NewEmailLog {
            subject: format!("[TEST] {subject}"),
            html_content,
            text_content,
            recipient_types: BTreeSet::new(),
            sent_by: (&admin.0).into(),
            is_test_email: true,
        },
        &[Target {
            email: to.clone(),
            name: admin.name.clone(),
            kind: None,
        }],
    )
    .await?;

    if report.success == 1 {
        return Ok(Reply::data(report).message(format!("Test email sent to {to}")));
    }
    let mut reply = Reply::data(report)
        .message(format!("Test email to {to} failed"))
        .status(StatusCode::INTERNAL_SERVER_ERROR);
    reply.success = false;
    Ok(reply)
}

pub async fn test_connection(
    _: Admin,
    Extension(mailer): MailerExt,
) -> Result<impl IntoResponse> {
    mailer
        .verify()
        .await
        .map_err(|e| e.transport_unavailable())?;
    Ok(Reply::done("Mail transport is reachable"))
}

pub async fn logs(
    _: Admin,
    Extension(db): DbExt,
    Params(query): Params<ListQuery>,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(EmailLog::list(&db, &query)?))
}

pub async fn log(
    _: Admin,
    Extension(db): DbExt,
    Id(id): Id<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(EmailLog::detail(&db, id)?))
}
