//! Launches scheduled campaigns once their time comes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::campaign::{self, Campaign, CampaignStatus};
use crate::{Config, Database, Mailer, Result};

/// Moves every due campaign to `sending` and starts its delivery in the
/// background. Returns the ids of the launched campaigns.
///
/// A campaign is only launched by whoever manages to flip it out of
/// `scheduled`, so overlapping ticks never send it twice.
pub fn launch_due(
    db: &Database,
    mailer: &Arc<dyn Mailer>,
    config: &Arc<Config>,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let mut launched = Vec::new();
    for due in Campaign::due(db, now)? {
        let flipped = Campaign::transition_if(
            db,
            due.id,
            Some(CampaignStatus::Scheduled),
            CampaignStatus::Sending,
        )?;
        if flipped.is_some() {
            tracing::info!(campaign = %due.id, title = %due.title, "launching scheduled campaign");
            campaign::spawn_delivery(db.clone(), mailer.clone(), config.clone(), due.id);
            launched.push(due.id);
        }
    }
    Ok(launched)
}

/// Checks for due campaigns every `mailing.schedule_interval_secs` until
/// cancelled.
pub async fn run(
    db: Database,
    mailer: Arc<dyn Mailer>,
    config: Arc<Config>,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs(config.mailing.schedule_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = launch_due(&db, &mailer, &config, Utc::now()) {
                    tracing::error!("failed launching scheduled campaigns: {e}");
                }
            }
        }
    }
    tracing::debug!("scheduler stopped");
}
