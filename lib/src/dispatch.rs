//! Batched delivery.
//!
//! A send job goes out in consecutive batches. All messages of a batch are
//! handed to the transport at once and the batch is joined before anything
//! else happens, so at most `batch_size` sends are ever in flight. Once a
//! batch settles its outcomes are written to the delivery log in one go and
//! the sender pauses before the next batch.
//!
//! A failing recipient only ever fails itself: the error is recorded on its
//! entry and the rest of the job carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::email::{pixel, Mailer, Outgoing};
use crate::Result;

/// Identity of the admin that started a send job, denormalized onto the job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SentBy {
    pub name: String,
    pub email: String,
}

impl From<&crate::config::Admin> for SentBy {
    fn from(admin: &crate::config::Admin) -> Self {
        Self {
            name: admin.name.clone(),
            email: admin.email.clone(),
        }
    }
}

/// One entry of the send list.
#[derive(Clone, Debug)]
pub struct Dispatch {
    pub email: String,
    pub name: String,
    /// Token for the open-tracking pixel, if the job tracks opens.
    pub tracking_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Payload {
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            batch_size: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::Mailing> for Pacing {
    fn from(mailing: &crate::config::Mailing) -> Self {
        Self {
            batch_size: mailing.batch_size.max(1),
            delay: mailing.batch_delay(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent { message_id: String },
    Failed { error: String },
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent { .. })
    }
}

/// Result of a single send attempt. `index` is the recipient's position in
/// the send list.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub index: usize,
    pub email: String,
    pub delivery: Delivery,
    pub at: DateTime<Utc>,
}

/// Durable record of a send job.
///
/// Implementations must apply the entry update and the matching counter
/// increment as one unit, and must only count entries that are still
/// pending.
pub trait DeliveryLog: Send + Sync {
    fn record_batch(&self, outcomes: &[Outcome]) -> Result<()>;

    fn record_outcome(&self, outcome: Outcome) -> Result<()> {
        self.record_batch(std::slice::from_ref(&outcome))
    }

    /// Moves the job to its terminal status. Calling it twice is harmless.
    fn finalize(&self) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    pub outcomes: Vec<Outcome>,
}

/// Where tracking pixels point to.
#[derive(Clone, Debug)]
pub struct Tracking {
    pub frontend_url: String,
    pub path: String,
}

impl Tracking {
    pub fn from_config(config: &crate::Config) -> Option<Self> {
        config.mailing.tracking.then(|| Tracking {
            frontend_url: config.frontend_url.clone(),
            path: config.mailing.tracking_base(),
        })
    }
}

#[derive(Clone)]
pub struct BatchSender {
    mailer: Arc<dyn Mailer>,
    pacing: Pacing,
    tracking: Option<Tracking>,
}

impl BatchSender {
    pub fn new(mailer: Arc<dyn Mailer>, pacing: Pacing) -> Self {
        Self {
            mailer,
            pacing,
            tracking: None,
        }
    }

    pub fn with_tracking(mut self, tracking: Option<Tracking>) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn from_config(mailer: Arc<dyn Mailer>, config: &crate::Config) -> Self {
        Self::new(mailer, Pacing::from(&config.mailing)).with_tracking(Tracking::from_config(config))
    }

    fn compose(&self, payload: &Payload, recipient: &Dispatch) -> Outgoing {
        let html = payload.html.as_ref().map(|html| {
            match (&self.tracking, &recipient.tracking_id) {
                (Some(tracking), Some(id)) => pixel::embed(
                    html,
                    &pixel::url(&tracking.frontend_url, &tracking.path, id),
                ),
                _ => html.clone(),
            }
        });
        Outgoing {
            to: recipient.email.clone(),
            to_name: recipient.name.clone(),
            subject: payload.subject.clone(),
            text: payload.text.clone(),
            html,
        }
    }

    /// Sends `payload` to every recipient, recording progress in `log`.
    ///
    /// Always runs to the end of the list. Failures to write to the log are
    /// reported but don't stop the job.
    #[tracing::instrument(skip_all, fields(recipients = recipients.len()))]
    pub async fn run<L: DeliveryLog + ?Sized>(
        &self,
        payload: &Payload,
        recipients: &[Dispatch],
        log: &L,
    ) -> Summary {
        let batch_size = self.pacing.batch_size.max(1);
        let batch_count = recipients.len().div_ceil(batch_size);
        let mut summary = Summary::default();

        for (n, batch) in recipients.chunks(batch_size).enumerate() {
            let offset = n * batch_size;
            let sends = batch.iter().enumerate().map(|(i, recipient)| {
                let outgoing = self.compose(payload, recipient);
                let mailer = self.mailer.clone();
                async move {
                    let delivery = match mailer.send(outgoing).await {
                        Ok(message_id) => Delivery::Sent { message_id },
                        Err(e) => {
                            tracing::warn!(email = %recipient.email, "send failed: {}", e.kind);
                            Delivery::Failed {
                                error: e.kind.to_string(),
                            }
                        }
                    };
                    Outcome {
                        index: offset + i,
                        email: recipient.email.clone(),
                        delivery,
                        at: Utc::now(),
                    }
                }
            });
            let outcomes = join_all(sends).await;

            let sent = outcomes.iter().filter(|o| o.delivery.is_sent()).count();
            summary.sent += sent;
            summary.failed += outcomes.len() - sent;
            summary.batches += 1;

            if let Err(e) = log.record_batch(&outcomes) {
                tracing::error!(batch = n + 1, "failed recording batch outcomes: {e}");
            }
            tracing::debug!(
                batch = n + 1,
                of = batch_count,
                sent,
                failed = outcomes.len() - sent,
                "batch settled"
            );
            summary.outcomes.extend(outcomes);

            if n + 1 < batch_count && !self.pacing.delay.is_zero() {
                tokio::time::sleep(self.pacing.delay).await;
            }
        }

        if let Err(e) = log.finalize() {
            tracing::error!("failed finalizing delivery log: {e}");
        }
        tracing::info!(
            batches = summary.batches,
            sent = summary.sent,
            failed = summary.failed,
            "send job finished"
        );

        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::ErrorKind;

    /// Mailer double that records every message and fails listed addresses.
    #[derive(Default)]
    pub struct FakeMailer {
        pub fail: HashSet<String>,
        pub sent: Mutex<Vec<Outgoing>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, message: Outgoing) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&message.to) {
                return Err(ErrorKind::EmailBadResponse("550".to_string()).into());
            }
            let id = format!("<{}@test>", self.sent.lock().unwrap().len());
            self.sent.lock().unwrap().push(message);
            Ok(id)
        }

        async fn verify(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        batches: Mutex<Vec<Vec<Outcome>>>,
        finalized: AtomicUsize,
    }

    impl DeliveryLog for MemoryLog {
        fn record_batch(&self, outcomes: &[Outcome]) -> Result<()> {
            self.batches.lock().unwrap().push(outcomes.to_vec());
            Ok(())
        }

        fn finalize(&self) -> Result<()> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenLog;

    impl DeliveryLog for BrokenLog {
        fn record_batch(&self, _: &[Outcome]) -> Result<()> {
            Err(ErrorKind::DbError("disk full".to_string()).into())
        }

        fn finalize(&self) -> Result<()> {
            Err(ErrorKind::DbError("disk full".to_string()).into())
        }
    }

    fn recipients(n: usize) -> Vec<Dispatch> {
        (0..n)
            .map(|i| Dispatch {
                email: format!("r{i}@x.com"),
                name: format!("R{i}"),
                tracking_id: Some(format!("t{i}")),
            })
            .collect()
    }

    fn sender(mailer: Arc<FakeMailer>, batch_size: usize) -> BatchSender {
        BatchSender::new(
            mailer,
            Pacing {
                batch_size,
                delay: Duration::ZERO,
            },
        )
    }

    fn payload() -> Payload {
        Payload {
            subject: "Hello".to_string(),
            text: Some("hi".to_string()),
            html: Some("<p>hi</p>".to_string()),
        }
    }

    #[tokio::test]
    async fn batch_count_is_ceiling_of_list_over_size() {
        for (n, size, expected) in [(0, 10, 0), (1, 10, 1), (10, 10, 1), (11, 10, 2), (25, 4, 7)] {
            let mailer = Arc::new(FakeMailer::default());
            let log = MemoryLog::default();
            let summary = sender(mailer, size).run(&payload(), &recipients(n), &log).await;
            assert_eq!(summary.batches, expected);
            assert_eq!(summary.sent + summary.failed, n);
            assert_eq!(log.batches.lock().unwrap().len(), expected);
            assert_eq!(log.finalized.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_job() {
        let mailer = Arc::new(FakeMailer {
            fail: ["r4@x.com".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let log = MemoryLog::default();
        let summary = sender(mailer.clone(), 10)
            .run(&payload(), &recipients(12), &log)
            .await;

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.sent, 11);
        assert_eq!(summary.failed, 1);

        let failed = summary
            .outcomes
            .iter()
            .find(|o| !o.delivery.is_sent())
            .unwrap();
        assert_eq!(failed.index, 4);
        match &failed.delivery {
            Delivery::Failed { error } => assert!(!error.is_empty()),
            _ => unreachable!(),
        }
        assert_eq!(mailer.sent.lock().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn in_flight_sends_are_bounded_by_batch_size() {
        let mailer = Arc::new(FakeMailer::default());
        sender(mailer.clone(), 3)
            .run(&payload(), &recipients(10), &MemoryLog::default())
            .await;
        assert!(mailer.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn outcome_indices_follow_list_positions() {
        let mailer = Arc::new(FakeMailer::default());
        let log = MemoryLog::default();
        sender(mailer, 4).run(&payload(), &recipients(9), &log).await;

        let batches = log.batches.lock().unwrap();
        let mut indices = batches[1].iter().map(|o| o.index).collect::<Vec<_>>();
        indices.sort();
        assert_eq!(indices, vec![4, 5, 6, 7]);
        assert_eq!(batches[2].len(), 1);
    }

    #[tokio::test]
    async fn log_failures_do_not_abort_sending() {
        let mailer = Arc::new(FakeMailer::default());
        let summary = sender(mailer.clone(), 2)
            .run(&payload(), &recipients(5), &BrokenLog)
            .await;
        assert_eq!(summary.sent, 5);
        assert_eq!(mailer.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn tracking_pixel_is_embedded_per_recipient() {
        let mailer = Arc::new(FakeMailer::default());
        let sender = sender(mailer.clone(), 10).with_tracking(Some(Tracking {
            frontend_url: "https://app.example.com".to_string(),
            path: "/newsletter/track-email".to_string(),
        }));
        sender
            .run(&payload(), &recipients(2), &MemoryLog::default())
            .await;

        let sent = mailer.sent.lock().unwrap();
        let html = sent
            .iter()
            .find(|m| m.to == "r1@x.com")
            .and_then(|m| m.html.clone())
            .unwrap();
        assert!(html.contains("https://app.example.com/newsletter/track-email/t1"));
        assert_eq!(sent[0].text.as_deref(), Some("hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_batches_but_not_after_the_last() {
        let mailer = Arc::new(FakeMailer::default());
        let sender = BatchSender::new(
            mailer,
            Pacing {
                batch_size: 2,
                delay: Duration::from_secs(1),
            },
        );
        let started = tokio::time::Instant::now();
        sender
            .run(&payload(), &recipients(6), &MemoryLog::default())
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }
}
