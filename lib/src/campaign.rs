//! Newsletter campaigns.
//!
//! A campaign row holds the job metadata and aggregate stats. Its recipients
//! are kept in a child tree, one entry per position, and every recipient's
//! tracking token is registered in a global index. Outcome updates and
//! tracked opens touch only the affected recipient entries plus the campaign
//! row, inside a single transaction, so concurrent writers never lose each
//! other's updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::Transactional;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::audience::{CustomFilters, TargetAudience, Target};
use crate::db::{abort, child_key, decode, encode, parse_child_key, Collectable, Identifiable};
use crate::dispatch::{BatchSender, Delivery, DeliveryLog, Dispatch, Outcome, Payload, SentBy, Summary};
use crate::query::{paginate, ListQuery, Page};
use crate::{Config, Database, ErrorKind, Mailer, Result};

/// Tree mapping tracking tokens to recipient keys.
const TRACKING_INDEX: &str = "tracking_ids";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    fn rank(self) -> u8 {
        match self {
            CampaignStatus::Draft => 0,
            CampaignStatus::Scheduled => 1,
            CampaignStatus::Sending => 2,
            CampaignStatus::Sent => 3,
            CampaignStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Sent | CampaignStatus::Failed)
    }

    /// Progression is linear. Failure can be declared from any non-terminal
    /// state.
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CampaignStatus::Failed || next.rank() > self.rank()
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecipientStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
}

impl RecipientStatus {
    /// Recipient statuses only ever move forward.
    pub fn can_transition_to(self, next: RecipientStatus) -> bool {
        use RecipientStatus::*;
        match self {
            Pending => next != Pending,
            Sent => matches!(next, Delivered | Opened | Clicked | Bounced),
            Delivered => matches!(next, Opened | Clicked | Bounced),
            Opened => next == Clicked,
            Clicked | Bounced | Failed => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email: String,
    pub name: String,
    pub status: RecipientStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub tracking_id: String,
}

impl Collectable for Recipient {
    fn get_collection_name() -> &'static str {
        "campaign_recipients"
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_recipients: u64,
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub failed: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub content: String,
    pub html_content: Option<String>,
    pub sender: SentBy,
    pub status: CampaignStatus,
    pub target_audience: TargetAudience,
    pub custom_filters: Option<CustomFilters>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub template: Option<String>,
    pub stats: Stats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collectable for Campaign {
    fn get_collection_name() -> &'static str {
        "campaigns"
    }
}

impl Identifiable for Campaign {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Number of campaigns per status, as shown on the stats page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCounts {
    pub total: usize,
    pub draft: usize,
    pub scheduled: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Everything needed to create a campaign, before recipients are attached.
#[derive(Clone, Debug, Default)]
pub struct NewCampaign {
    pub title: String,
    pub subject: String,
    pub content: String,
    pub html_content: Option<String>,
    pub sender: SentBy,
    pub target_audience: TargetAudience,
    pub custom_filters: Option<CustomFilters>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub template: Option<String>,
}

/// Campaign with its full recipient list.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub recipients: Vec<Recipient>,
}

impl Campaign {
    /// Persists a new draft campaign with one pending entry per target.
    ///
    /// Tracking tokens are reserved in the global index, regenerated on the
    /// unlikely collision, and written together with the recipients and the
    /// campaign row in one transaction. A failed create leaves nothing behind.
    pub fn create(db: &Database, new: NewCampaign, targets: &[Target]) -> Result<Campaign> {
        if targets.is_empty() {
            return Err(ErrorKind::EmptyAudience.into());
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let campaign = Campaign {
            id,
            title: new.title,
            subject: new.subject,
            content: new.content,
            html_content: new.html_content,
            sender: new.sender,
            status: CampaignStatus::Draft,
            target_audience: new.target_audience,
            custom_filters: new.custom_filters,
            scheduled_at: new.scheduled_at,
            sent_at: None,
            template: new.template,
            stats: Stats {
                total_recipients: targets.len() as u64,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        };
        let row = encode(&campaign)?;

        let tracking = db.tree_at(TRACKING_INDEX)?;
        let recipients = db.tree::<Recipient>()?;
        let campaigns = db.tree::<Campaign>()?;

        (&tracking, &recipients, &campaigns).transaction(|(tracking, recipients, campaigns)| {
            for (index, target) in targets.iter().enumerate() {
                let key = child_key(id, index as u32);
                let tracking_id = loop {
                    let candidate = crate::util::tracking_id();
                    if tracking.get(candidate.as_bytes())?.is_none() {
                        break candidate;
                    }
                    tracing::warn!("tracking id collision, regenerating");
                };
                tracking.insert(tracking_id.as_bytes(), &key[..])?;

                let recipient = Recipient {
                    email: target.email.clone(),
                    name: target.name.clone(),
                    tracking_id,
                    ..Default::default()
                };
                recipients.insert(&key[..], encode(&recipient).map_err(abort)?)?;
            }
            campaigns.insert(&id.as_bytes()[..], &row[..])?;
            Ok(())
        })?;

        tracing::info!(campaign = %id, recipients = targets.len(), "campaign created");
        Ok(campaign)
    }

    pub fn recipients(db: &Database, id: Uuid) -> Result<Vec<Recipient>> {
        db.get_children(id)
    }

    pub fn detail(db: &Database, id: Uuid) -> Result<CampaignDetail> {
        Ok(CampaignDetail {
            campaign: db.get(id)?,
            recipients: Campaign::recipients(db, id)?,
        })
    }

    /// Moves the campaign to `next`. Transitioning to the current status is a
    /// no-op, anything going backwards is rejected.
    pub fn transition(db: &Database, id: Uuid, next: CampaignStatus) -> Result<Campaign> {
        Self::transition_if(db, id, None, next)?
            .ok_or_else(|| ErrorKind::Other(format!("campaign {id} changed concurrently")).into())
    }

    /// Like `transition`, but only when the campaign is currently in
    /// `expected`. Returns `None` when it isn't.
    pub fn transition_if(
        db: &Database,
        id: Uuid,
        expected: Option<CampaignStatus>,
        next: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let campaigns = db.tree::<Campaign>()?;
        let campaign = campaigns.transaction(|tree| {
            let bytes = tree
                .get(id.as_bytes())?
                .ok_or_else(|| abort(ErrorKind::NotFound(format!("campaign {id}"))))?;
            let mut campaign: Campaign = decode(&bytes).map_err(abort)?;
            if expected.is_some_and(|expected| expected != campaign.status) {
                return Ok(None);
            }
            if campaign.status == next {
                return Ok(Some(campaign));
            }
            if !campaign.status.can_transition_to(next) {
                return Err(abort(ErrorKind::BadInput(format!(
                    "campaign cannot go from {} to {}",
                    campaign.status, next
                ))));
            }
            let now = Utc::now();
            campaign.status = next;
            campaign.updated_at = now;
            if next == CampaignStatus::Sent {
                campaign.sent_at = Some(now);
            }
            tree.insert(&id.as_bytes()[..], encode(&campaign).map_err(abort)?)?;
            Ok(Some(campaign))
        })?;
        Ok(campaign)
    }

    /// Counts an open for the recipient holding `tracking_id`.
    ///
    /// Only a recipient in exactly `sent` status is moved to `opened`, so
    /// repeated hits and hits on failed recipients change nothing. Returns
    /// whether an open was recorded.
    pub fn track_open(db: &Database, tracking_id: &str) -> Result<bool> {
        let key = match db.tree_at(TRACKING_INDEX)?.get(tracking_id.as_bytes())? {
            Some(key) => key,
            None => return Ok(false),
        };
        let (campaign_id, _) = parse_child_key(&key)?;

        let recipients = db.tree::<Recipient>()?;
        let campaigns = db.tree::<Campaign>()?;
        let now = Utc::now();

        let opened = (&recipients, &campaigns).transaction(|(recipients, campaigns)| {
            let Some(bytes) = recipients.get(&key)? else {
                return Ok(false);
            };
            let mut recipient: Recipient = decode(&bytes).map_err(abort)?;
            if recipient.status != RecipientStatus::Sent {
                return Ok(false);
            }
            let Some(bytes) = campaigns.get(campaign_id.as_bytes())? else {
                return Ok(false);
            };
            let mut campaign: Campaign = decode(&bytes).map_err(abort)?;

            recipient.status = RecipientStatus::Opened;
            recipient.opened_at = Some(now);
            campaign.stats.opened += 1;
            campaign.updated_at = now;

            recipients.insert(&key[..], encode(&recipient).map_err(abort)?)?;
            campaigns.insert(&campaign_id.as_bytes()[..], encode(&campaign).map_err(abort)?)?;
            Ok(true)
        })?;

        if opened {
            tracing::debug!(campaign = %campaign_id, "open tracked");
        }
        Ok(opened)
    }

    /// Campaigns filtered by status, newest first. Recipients are not loaded.
    pub fn list(db: &Database, query: &ListQuery) -> Result<Page<Campaign>> {
        let status = query.status::<CampaignStatus>()?;
        let mut campaigns = db
            .get_collection::<Campaign>()?
            .into_iter()
            .filter(|c| status.map_or(true, |status| c.status == status))
            .filter(|c| crate::util::matches_search(query.search(), &[&c.title, &c.subject]))
            .collect::<Vec<_>>();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(campaigns, query.page(), query.limit()))
    }

    pub fn counts(db: &Database) -> Result<CampaignCounts> {
        let mut counts = CampaignCounts::default();
        for campaign in db.get_collection::<Campaign>()? {
            counts.total += 1;
            match campaign.status {
                CampaignStatus::Draft => counts.draft += 1,
                CampaignStatus::Scheduled => counts.scheduled += 1,
                CampaignStatus::Sending => counts.sending += 1,
                CampaignStatus::Sent => counts.sent += 1,
                CampaignStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Scheduled campaigns whose time has come.
    pub fn due(db: &Database, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        Ok(db
            .get_collection::<Campaign>()?
            .into_iter()
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .filter(|c| c.scheduled_at.map_or(true, |at| at <= now))
            .collect())
    }

    fn payload(&self) -> Payload {
        Payload {
            subject: self.subject.clone(),
            text: Some(self.content.clone()).filter(|c| !c.is_empty()),
            html: self.html_content.clone().filter(|h| !h.is_empty()),
        }
    }
}

/// Delivery log handle for one campaign.
#[derive(Clone)]
pub struct CampaignLog {
    db: Database,
    id: Uuid,
}

impl CampaignLog {
    pub fn new(db: Database, id: Uuid) -> Self {
        Self { db, id }
    }
}

impl DeliveryLog for CampaignLog {
    fn record_batch(&self, outcomes: &[Outcome]) -> Result<()> {
        let recipients = self.db.tree::<Recipient>()?;
        let campaigns = self.db.tree::<Campaign>()?;
        let id = self.id;

        (&recipients, &campaigns).transaction(|(recipients, campaigns)| {
            let bytes = campaigns
                .get(id.as_bytes())?
                .ok_or_else(|| abort(ErrorKind::NotFound(format!("campaign {id}"))))?;
            let mut campaign: Campaign = decode(&bytes).map_err(abort)?;

            for outcome in outcomes {
                let key = child_key(id, outcome.index as u32);
                let Some(bytes) = recipients.get(&key)? else {
                    continue;
                };
                let mut recipient: Recipient = decode(&bytes).map_err(abort)?;
                if recipient.status != RecipientStatus::Pending {
                    continue;
                }
                match &outcome.delivery {
                    Delivery::Sent { .. } => {
                        recipient.status = RecipientStatus::Sent;
                        recipient.sent_at = Some(outcome.at);
                        campaign.stats.sent += 1;
                    }
                    Delivery::Failed { error } => {
                        recipient.status = RecipientStatus::Failed;
                        recipient.error_message = Some(error.clone());
                        campaign.stats.failed += 1;
                    }
                }
                recipients.insert(&key[..], encode(&recipient).map_err(abort)?)?;
            }

            campaign.updated_at = Utc::now();
            campaigns.insert(&id.as_bytes()[..], encode(&campaign).map_err(abort)?)?;
            Ok(())
        })?;
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        Campaign::transition(&self.db, self.id, CampaignStatus::Sent)?;
        Ok(())
    }
}

/// Runs the send job of a campaign that is already in `sending` status.
pub async fn deliver(
    db: Database,
    mailer: Arc<dyn Mailer>,
    config: Arc<Config>,
    id: Uuid,
) -> Result<Summary> {
    let campaign: Campaign = db.get(id)?;
    let recipients = Campaign::recipients(&db, id)?
        .into_iter()
        .map(|r| Dispatch {
            email: r.email,
            name: r.name,
            tracking_id: Some(r.tracking_id),
        })
        .collect::<Vec<_>>();

    let sender = BatchSender::from_config(mailer, &config);
    let log = CampaignLog::new(db, id);
    Ok(sender.run(&campaign.payload(), &recipients, &log).await)
}

/// Sends a campaign in the background. If the job can't even start the
/// campaign is marked as failed.
pub fn spawn_delivery(db: Database, mailer: Arc<dyn Mailer>, config: Arc<Config>, id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = deliver(db.clone(), mailer, config, id).await {
            tracing::error!(campaign = %id, "campaign delivery failed: {e}");
            if let Err(e) = Campaign::transition(&db, id, CampaignStatus::Failed) {
                tracing::error!(campaign = %id, "failed marking campaign as failed: {e}");
            }
        }
    });
}
