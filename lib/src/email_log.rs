//! Send log of the generic bulk email flow.
//!
//! Works like a campaign without open tracking: the log row carries the
//! counters, per-recipient results sit in a child tree and are written in the
//! same transaction as the counters they affect.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::Transactional;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::audience::Target;
use crate::db::{abort, child_key, decode, encode, Collectable, Identifiable};
use crate::directory::RecipientType;
use crate::dispatch::{BatchSender, Delivery, DeliveryLog, Dispatch, Outcome, Payload, SentBy, Summary};
use crate::query::{paginate, ListQuery, Page};
use crate::{Config, Database, ErrorKind, Mailer, Result};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogStatus {
    #[default]
    Pending,
    Sending,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LogStatus::Completed | LogStatus::Failed)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub email: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<RecipientType>,
    pub status: ResultStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Collectable for SendResult {
    fn get_collection_name() -> &'static str {
        "email_log_results"
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub id: Uuid,
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub recipient_types: BTreeSet<RecipientType>,
    pub total_recipients: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub sent_by: SentBy,
    pub status: LogStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_test_email: bool,
    pub created_at: DateTime<Utc>,
}

impl Collectable for EmailLog {
    fn get_collection_name() -> &'static str {
        "email_logs"
    }
}

impl Identifiable for EmailLog {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewEmailLog {
    pub subject: String,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub recipient_types: BTreeSet<RecipientType>,
    pub sent_by: SentBy,
    pub is_test_email: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLogDetail {
    #[serde(flatten)]
    pub log: EmailLog,
    pub results: Vec<SendResult>,
}

/// What the bulk send endpoints report back once a job is over.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub log_id: Uuid,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub results: Vec<SendResult>,
}

impl EmailLog {
    /// Persists a pending log with one pending result per target.
    pub fn create(db: &Database, new: NewEmailLog, targets: &[Target]) -> Result<EmailLog> {
        if targets.is_empty() {
            return Err(ErrorKind::EmptyAudience.into());
        }
        let id = Uuid::new_v4();
        let results = targets
            .iter()
            .map(|t| SendResult {
                email: t.email.clone(),
                name: t.name.clone(),
                kind: t.kind,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        db.set_children(id, &results)?;

        let log = EmailLog {
            id,
            subject: new.subject,
            html_content: new.html_content,
            text_content: new.text_content,
            recipient_types: new.recipient_types,
            total_recipients: results.len() as u64,
            success_count: 0,
            failure_count: 0,
            sent_by: new.sent_by,
            status: LogStatus::Pending,
            started_at: None,
            completed_at: None,
            is_test_email: new.is_test_email,
            created_at: Utc::now(),
        };
        db.set(&log)?;
        Ok(log)
    }

    pub fn results(db: &Database, id: Uuid) -> Result<Vec<SendResult>> {
        db.get_children(id)
    }

    pub fn detail(db: &Database, id: Uuid) -> Result<EmailLogDetail> {
        Ok(EmailLogDetail {
            log: db.get(id)?,
            results: EmailLog::results(db, id)?,
        })
    }

    /// Moves the log to `status`. Terminal statuses stamp the completion time
    /// once and are never left again.
    pub fn set_status(db: &Database, id: Uuid, status: LogStatus) -> Result<EmailLog> {
        let logs = db.tree::<EmailLog>()?;
        let log = logs.transaction(|tree| {
            let bytes = tree
                .get(id.as_bytes())?
                .ok_or_else(|| abort(ErrorKind::NotFound(format!("email log {id}"))))?;
            let mut log: EmailLog = decode(&bytes).map_err(abort)?;
            if log.status == status {
                return Ok(log);
            }
            if log.status.is_terminal() {
                return Err(abort(ErrorKind::BadInput(format!(
                    "email log is already {}",
                    log.status
                ))));
            }
            let now = Utc::now();
            log.status = status;
            match status {
                LogStatus::Sending => log.started_at = Some(now),
                LogStatus::Completed | LogStatus::Failed => log.completed_at = Some(now),
                LogStatus::Pending => (),
            }
            tree.insert(&id.as_bytes()[..], encode(&log).map_err(abort)?)?;
            Ok(log)
        })?;
        Ok(log)
    }

    /// Logs filtered by status, test flag and subject search, newest first.
    pub fn list(db: &Database, query: &ListQuery) -> Result<Page<EmailLog>> {
        let status = query.status::<LogStatus>()?;
        let mut logs = db
            .get_collection::<EmailLog>()?
            .into_iter()
            .filter(|l| status.map_or(true, |status| l.status == status))
            .filter(|l| query.is_test_email.map_or(true, |test| l.is_test_email == test))
            .filter(|l| {
                crate::util::matches_search(query.search(), &[&l.subject, &l.sent_by.email])
            })
            .collect::<Vec<_>>();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(logs, query.page(), query.limit()))
    }

    fn payload(&self) -> Payload {
        Payload {
            subject: self.subject.clone(),
            text: self.text_content.clone().filter(|t| !t.is_empty()),
            html: self.html_content.clone().filter(|h| !h.is_empty()),
        }
    }
}

/// Delivery log handle for one email log.
#[derive(Clone)]
pub struct EmailLogHandle {
    db: Database,
    id: Uuid,
}

impl EmailLogHandle {
    pub fn new(db: Database, id: Uuid) -> Self {
        Self { db, id }
    }
}

impl DeliveryLog for EmailLogHandle {
    fn record_batch(&self, outcomes: &[Outcome]) -> Result<()> {
        let results = self.db.tree::<SendResult>()?;
        let logs = self.db.tree::<EmailLog>()?;
        let id = self.id;

        (&results, &logs).transaction(|(results, logs)| {
            let bytes = logs
                .get(id.as_bytes())?
                .ok_or_else(|| abort(ErrorKind::NotFound(format!("email log {id}"))))?;
            let mut log: EmailLog = decode(&bytes).map_err(abort)?;

            for outcome in outcomes {
                let key = child_key(id, outcome.index as u32);
                let Some(bytes) = results.get(&key)? else {
                    continue;
                };
                let mut result: SendResult = decode(&bytes).map_err(abort)?;
                if result.status != ResultStatus::Pending {
                    continue;
                }
                result.sent_at = Some(outcome.at);
                match &outcome.delivery {
                    Delivery::Sent { message_id } => {
                        result.status = ResultStatus::Success;
                        result.message_id = Some(message_id.clone());
                        log.success_count += 1;
                    }
                    Delivery::Failed { error } => {
                        result.status = ResultStatus::Failed;
                        result.error = Some(error.clone());
                        log.failure_count += 1;
                    }
                }
                results.insert(&key[..], encode(&result).map_err(abort)?)?;
            }

            logs.insert(&id.as_bytes()[..], encode(&log).map_err(abort)?)?;
            Ok(())
        })?;
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        EmailLog::set_status(&self.db, self.id, LogStatus::Completed)?;
        Ok(())
    }
}

/// Runs a bulk send to completion.
///
/// The transport is verified after the log exists, so an unreachable server
/// leaves a `failed` log behind instead of nothing at all.
pub async fn send(
    db: &Database,
    mailer: Arc<dyn Mailer>,
    config: &Config,
    new: NewEmailLog,
    targets: &[Target],
) -> Result<SendReport> {
    let log = EmailLog::create(db, new, targets)?;

    if let Err(e) = mailer.verify().await {
        tracing::error!(log = %log.id, "mail transport unavailable: {e}");
        EmailLog::set_status(db, log.id, LogStatus::Failed)?;
        return Err(e.transport_unavailable());
    }
    EmailLog::set_status(db, log.id, LogStatus::Sending)?;

    let recipients = targets
        .iter()
        .map(|t| Dispatch {
            email: t.email.clone(),
            name: t.name.clone(),
            tracking_id: None,
        })
        .collect::<Vec<_>>();
    let sender = BatchSender::new(mailer, (&config.mailing).into());
    let handle = EmailLogHandle::new(db.clone(), log.id);
    let summary: Summary = sender.run(&log.payload(), &recipients, &handle).await;

    let detail = EmailLog::detail(db, log.id)?;
    tracing::info!(
        log = %log.id,
        batches = summary.batches,
        success = detail.log.success_count,
        failure = detail.log.failure_count,
        "bulk send finished"
    );
    Ok(SendReport {
        log_id: log.id,
        total: detail.log.total_recipients,
        success: detail.log.success_count,
        failure: detail.log.failure_count,
        results: detail.results,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::dispatch::tests::FakeMailer;
    use crate::email::Outgoing;

    struct Unreachable;

    #[async_trait]
    impl Mailer for Unreachable {
        async fn send(&self, _: Outgoing) -> Result<String> {
            Err(ErrorKind::EmailBadResponse("connection refused".to_string()).into())
        }

        async fn verify(&self) -> Result<()> {
            Err(ErrorKind::EmailBadResponse("connection refused".to_string()).into())
        }
    }

    fn targets(n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| Target {
                email: format!("c{i}@corp.com"),
                name: format!("C{i}"),
                kind: Some(RecipientType::Company),
            })
            .collect()
    }

    fn new_log() -> NewEmailLog {
        NewEmailLog {
            subject: "Offer".to_string(),
            html_content: Some("<p>offer</p>".to_string()),
            recipient_types: [RecipientType::Company].into_iter().collect(),
            ..Default::default()
        }
    }

    fn config() -> Config {
        Config {
            mailing: crate::config::Mailing {
                batch_delay_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn created_log_is_pending_with_pending_results() {
        let db = Database::temporary().unwrap();
        let log = EmailLog::create(&db, new_log(), &targets(3)).unwrap();
        assert_eq!(log.status, LogStatus::Pending);
        assert_eq!(log.total_recipients, 3);
        let results = EmailLog::results(&db, log.id).unwrap();
        assert!(results.iter().all(|r| r.status == ResultStatus::Pending));
        assert_eq!(results[0].kind, Some(RecipientType::Company));
    }

    #[test]
    fn completed_is_final() {
        let db = Database::temporary().unwrap();
        let log = EmailLog::create(&db, new_log(), &targets(1)).unwrap();
        let done = EmailLog::set_status(&db, log.id, LogStatus::Completed).unwrap();
        let again = EmailLog::set_status(&db, log.id, LogStatus::Completed).unwrap();
        assert_eq!(done.completed_at, again.completed_at);
        assert!(EmailLog::set_status(&db, log.id, LogStatus::Sending).is_err());
    }

    #[tokio::test]
    async fn send_records_every_result() {
        let db = Database::temporary().unwrap();
        let mailer = Arc::new(FakeMailer {
            fail: ["c1@corp.com".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let report = send(&db, mailer, &config(), new_log(), &targets(4)).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.success, 3);
        assert_eq!(report.failure, 1);
        assert!(report.results[1].error.is_some());
        assert!(report.results[0].message_id.is_some());

        let stored: EmailLog = db.get(report.log_id).unwrap();
        assert_eq!(stored.status, LogStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn unreachable_transport_fails_the_log() {
        let db = Database::temporary().unwrap();
        let err = send(&db, Arc::new(Unreachable), &config(), new_log(), &targets(2))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TransportUnavailable(_)));

        let logs = db.get_collection::<EmailLog>().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].success_count + logs[0].failure_count, 0);
    }

    #[test]
    fn list_filters_test_emails() {
        let db = Database::temporary().unwrap();
        EmailLog::create(&db, new_log(), &targets(1)).unwrap();
        EmailLog::create(
            &db,
            NewEmailLog {
                is_test_email: true,
                ..new_log()
            },
            &targets(1),
        )
        .unwrap();

        let query = ListQuery {
            is_test_email: Some(true),
            ..Default::default()
        };
        let page = EmailLog::list(&db, &query).unwrap();
        assert_eq!(page.pagination.total, 1);
        assert!(page.items[0].is_test_email);
    }
}
