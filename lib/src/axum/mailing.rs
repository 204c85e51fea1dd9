//! Newsletter subscriptions and campaigns.

use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::Extension;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use uuid::Uuid;

use crate::audience::{self, CustomFilters, TargetAudience};
use crate::campaign::{self, Campaign, CampaignStatus, NewCampaign};
use crate::email::list::{self, SubscribeRequest, Subscriber, SubscriberSource, SubscriberStatus, Subscription};
use crate::query::ListQuery;
use crate::{routes, util, Result};

use super::extract::{Body, Id, Params};
use super::{Admin, ConfigExt, DbExt, MailerExt, Reply, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::SUBSCRIBE, post(subscribe))
        .route(routes::UNSUBSCRIBE, post(unsubscribe))
        .route(routes::NEWSLETTER, get(subscribers))
        .route(routes::NEWSLETTER_STATS, get(stats))
        .route(routes::SUBSCRIBER_STATUS, patch(set_status))
        .route(routes::SUBSCRIBER, axum::routing::delete(delete))
        .route(routes::SEND_CAMPAIGN, post(send_campaign))
        .route(routes::CAMPAIGNS, get(campaigns))
        .route(routes::CAMPAIGN, get(campaign))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubscribeBody {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub source: Option<SubscriberSource>,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub status: SubscriberStatus,
    pub subscribed_at: DateTime<Utc>,
}

impl From<&Subscriber> for SubscriptionSummary {
    fn from(s: &Subscriber) -> Self {
        Self {
            id: s.id,
            email: s.email.clone(),
            name: s.name.clone(),
            status: s.status,
            subscribed_at: s.subscribed_at,
        }
    }
}

pub async fn subscribe(
    Extension(db): DbExt,
    headers: HeaderMap,
    Body(body): Body<SubscribeBody>,
) -> Result<impl IntoResponse> {
    let subscription = list::subscribe(
        &db,
        SubscribeRequest {
            email: body.email,
            name: body.name,
            phone: body.phone,
            source: body.source,
            tags: body.tags,
            ip_address: util::client_ip(&headers),
            user_agent: util::user_agent(&headers),
        },
    )?;

    let summary = SubscriptionSummary::from(subscription.subscriber());
    Ok(match subscription {
        Subscription::Created(_) => {
            Reply::created(summary).message("Successfully subscribed to the newsletter")
        }
        Subscription::Reactivated(_) => {
            Reply::data(summary).message("Welcome back, your subscription is active again")
        }
    })
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnsubscribeBody {
    pub email: String,
}

pub async fn unsubscribe(
    Extension(db): DbExt,
    Body(body): Body<UnsubscribeBody>,
) -> Result<impl IntoResponse> {
    let subscriber = list::unsubscribe(&db, &body.email)?;
    Ok(Reply::data(SubscriptionSummary::from(&subscriber))
        .message("Successfully unsubscribed from the newsletter"))
}

pub async fn subscribers(
    _: Admin,
    Extension(db): DbExt,
    Params(query): Params<ListQuery>,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(list::list(&db, &query)?))
}

#[derive(Clone, Debug, Serialize)]
pub struct NewsletterStats {
    pub subscribers: list::SubscriberStats,
    pub campaigns: campaign::CampaignCounts,
}

pub async fn stats(
    _: Admin,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(NewsletterStats {
        subscribers: list::stats(&db, config.mailing.recent_days)?,
        campaigns: Campaign::counts(&db)?,
    }))
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatusBody {
    pub status: SubscriberStatus,
}

pub async fn set_status(
    _: Admin,
    Extension(db): DbExt,
    Id(id): Id<Uuid>,
    Body(body): Body<StatusBody>,
) -> Result<impl IntoResponse> {
    let subscriber = list::set_status(&db, id, body.status)?;
    Ok(Reply::data(subscriber).message("Subscriber status updated"))
}

pub async fn delete(
    _: Admin,
    Extension(db): DbExt,
    Id(id): Id<Uuid>,
) -> Result<impl IntoResponse> {
    let subscriber = list::delete(&db, id)?;
    tracing::info!(email = %subscriber.email, "subscriber deleted");
    Ok(Reply::done("Subscriber deleted"))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendCampaignBody {
    pub title: String,
    pub subject: String,
    pub content: String,
    pub html_content: Option<String>,
    pub target_audience: TargetAudience,
    pub custom_filters: Option<CustomFilters>,
    pub template: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub id: Uuid,
    pub title: String,
    pub status: CampaignStatus,
    pub total_recipients: u64,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Creates a campaign for the resolved audience and starts sending it in the
/// background, unless it's scheduled for later.
pub async fn send_campaign(
    admin: Admin,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
    Extension(mailer): MailerExt,
    Body(body): Body<SendCampaignBody>,
) -> Result<impl IntoResponse> {
    let new = NewCampaign {
        title: util::required("title", &body.title)?,
        subject: util::required("subject", &body.subject)?,
        content: util::required("content", &body.content)?,
        html_content: body.html_content,
        sender: (&admin.0).into(),
        target_audience: body.target_audience,
        custom_filters: body.custom_filters,
        scheduled_at: body.scheduled_at,
        template: body.template,
    };

    let now = Utc::now();
    let subscribers = db.get_collection::<Subscriber>()?;
    let targets = audience::resolve(
        &subscribers,
        new.target_audience,
        new.custom_filters.as_ref(),
        now,
        config.mailing.recent_days,
    )?;
    let created = Campaign::create(&db, new, &targets)?;

    let campaign = match created.scheduled_at {
        Some(at) if at > now => Campaign::transition(&db, created.id, CampaignStatus::Scheduled)?,
        _ => {
            let sending = Campaign::transition(&db, created.id, CampaignStatus::Sending)?;
            campaign::spawn_delivery(db.clone(), mailer, config.clone(), created.id);
            sending
        }
    };

    tracing::info!(
        campaign = %campaign.id,
        admin = %admin.email,
        recipients = campaign.stats.total_recipients,
        status = %campaign.status,
        "campaign submitted"
    );

    let message = match campaign.status {
        CampaignStatus::Scheduled => "Campaign scheduled",
        _ => "Campaign is being sent",
    };
    Ok(Reply::created(CampaignSummary {
        id: campaign.id,
        title: campaign.title,
        status: campaign.status,
        total_recipients: campaign.stats.total_recipients,
        scheduled_at: campaign.scheduled_at,
    })
    .message(message))
}

pub async fn campaigns(
    _: Admin,
    Extension(db): DbExt,
    Params(query): Params<ListQuery>,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(Campaign::list(&db, &query)?))
}

pub async fn campaign(
    _: Admin,
    Extension(db): DbExt,
    Id(id): Id<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Reply::data(Campaign::detail(&db, id)?))
}
