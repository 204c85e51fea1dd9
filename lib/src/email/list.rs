//! Newsletter subscribers.
//!
//! Addresses are stored lowercased and indexed in a separate tree, which is
//! what keeps them unique regardless of the case used when subscribing.
//! Unsubscribing keeps the row around so that a later subscription with the
//! same address reactivates it instead of creating a duplicate.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use sled::Transactional;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::db::{abort, decode, encode, Collectable, Identifiable};
use crate::query::{paginate, ListQuery, Page};
use crate::{Database, ErrorKind, Result};

/// Tree mapping lowercased addresses to subscriber ids.
const EMAIL_INDEX: &str = "subscriber_emails";

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriberSource {
    #[default]
    Newsletter,
    Contact,
    Course,
    Other,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriberStatus {
    #[default]
    Active,
    Unsubscribed,
    Bounced,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: Uuid,

    /// Always lowercased.
    pub email: String,
    pub name: String,
    pub phone: String,

    pub source: SubscriberSource,
    pub status: SubscriberStatus,

    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    pub tags: HashSet<String>,

    /// Free-form notes kept by admins.
    pub notes: String,

    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(email: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            name: String::new(),
            phone: String::new(),
            source: SubscriberSource::default(),
            status: SubscriberStatus::Active,
            subscribed_at: now,
            unsubscribed_at: None,
            ip_address: None,
            user_agent: None,
            tags: Default::default(),
            notes: String::new(),
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriberStatus::Active
    }

    /// Brings an unsubscribed or bounced subscriber back.
    fn reactivate(&mut self, now: DateTime<Utc>) {
        self.status = SubscriberStatus::Active;
        self.subscribed_at = now;
        self.unsubscribed_at = None;
    }

    fn apply(&mut self, request: &SubscribeRequest) {
        if let Some(name) = request.name.as_ref().filter(|n| !n.is_empty()) {
            self.name = name.clone();
        }
        if let Some(phone) = request.phone.as_ref().filter(|p| !p.is_empty()) {
            self.phone = phone.clone();
        }
        if let Some(source) = request.source {
            self.source = source;
        }
        self.tags.extend(request.tags.iter().cloned());
        if request.ip_address.is_some() {
            self.ip_address = request.ip_address.clone();
        }
        if request.user_agent.is_some() {
            self.user_agent = request.user_agent.clone();
        }
    }
}

impl Collectable for Subscriber {
    fn get_collection_name() -> &'static str {
        "subscribers"
    }
}

impl Identifiable for Subscriber {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Clone, Debug, Default)]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub source: Option<SubscriberSource>,
    pub tags: Vec<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug)]
pub enum Subscription {
    Created(Subscriber),
    Reactivated(Subscriber),
}

impl Subscription {
    pub fn subscriber(&self) -> &Subscriber {
        match self {
            Subscription::Created(s) | Subscription::Reactivated(s) => s,
        }
    }
}

/// Subscribes an address, reusing the existing row when the address was seen
/// before.
pub fn subscribe(db: &Database, request: SubscribeRequest) -> Result<Subscription> {
    let email = crate::util::normalize_email(&request.email)?;
    let index = db.tree_at(EMAIL_INDEX)?;
    let subscribers = db.tree::<Subscriber>()?;
    let now = Utc::now();

    let subscription = (&index, &subscribers).transaction(|(index, subscribers)| {
        match index.get(email.as_bytes())? {
            Some(id) => {
                let id = Uuid::from_slice(&id).map_err(abort)?;
                let bytes = subscribers.get(id.as_bytes())?.ok_or_else(|| {
                    abort(ErrorKind::DbError(format!("dangling email index for {email}")))
                })?;
                let mut subscriber: Subscriber = decode(&bytes).map_err(abort)?;
                if subscriber.is_active() {
                    return Err(abort(ErrorKind::AlreadySubscribed(email.clone())));
                }
                subscriber.reactivate(now);
                subscriber.apply(&request);
                subscribers.insert(&id.as_bytes()[..], encode(&subscriber).map_err(abort)?)?;
                Ok(Subscription::Reactivated(subscriber))
            }
            None => {
                let mut subscriber = Subscriber::new(email.clone());
                subscriber.subscribed_at = now;
                subscriber.created_at = now;
                subscriber.apply(&request);
                index.insert(email.as_bytes(), &subscriber.id.as_bytes()[..])?;
                subscribers.insert(
                    &subscriber.id.as_bytes()[..],
                    encode(&subscriber).map_err(abort)?,
                )?;
                Ok(Subscription::Created(subscriber))
            }
        }
    })?;

    tracing::info!(email = %subscription.subscriber().email, "subscribed");
    Ok(subscription)
}

pub fn unsubscribe(db: &Database, email: &str) -> Result<Subscriber> {
    let email = crate::util::normalize_email(email)?;
    let id = find_id(db, &email)?
        .ok_or_else(|| ErrorKind::NotFound(format!("no subscription for {email}")))?;

    let subscriber = update(db, id, |subscriber| {
        if subscriber.status == SubscriberStatus::Unsubscribed {
            return Err(ErrorKind::AlreadyUnsubscribed(subscriber.email.clone()).into());
        }
        subscriber.status = SubscriberStatus::Unsubscribed;
        subscriber.unsubscribed_at = Some(Utc::now());
        Ok(())
    })?;

    tracing::info!(email = %subscriber.email, "unsubscribed");
    Ok(subscriber)
}

/// Admin status change.
pub fn set_status(db: &Database, id: Uuid, status: SubscriberStatus) -> Result<Subscriber> {
    update(db, id, |subscriber| {
        if subscriber.status == status {
            return Ok(());
        }
        let now = Utc::now();
        match status {
            SubscriberStatus::Active => subscriber.reactivate(now),
            SubscriberStatus::Unsubscribed => {
                subscriber.status = status;
                subscriber.unsubscribed_at = Some(now);
            }
            SubscriberStatus::Bounced => subscriber.status = status,
        }
        Ok(())
    })
}

/// Hard delete, only ever done on explicit admin request.
pub fn delete(db: &Database, id: Uuid) -> Result<Subscriber> {
    let index = db.tree_at(EMAIL_INDEX)?;
    let subscribers = db.tree::<Subscriber>()?;

    let removed = (&index, &subscribers).transaction(|(index, subscribers)| {
        let bytes = subscribers
            .remove(&id.as_bytes()[..])?
            .ok_or_else(|| abort(ErrorKind::NotFound(format!("subscriber {id}"))))?;
        let subscriber: Subscriber = decode(&bytes).map_err(abort)?;
        index.remove(subscriber.email.as_bytes())?;
        Ok(subscriber)
    })?;

    Ok(removed)
}

pub fn find_by_email(db: &Database, email: &str) -> Result<Option<Subscriber>> {
    let email = crate::util::normalize_email(email)?;
    match find_id(db, &email)? {
        Some(id) => db.find(id),
        None => Ok(None),
    }
}

fn find_id(db: &Database, email: &str) -> Result<Option<Uuid>> {
    match db.tree_at(EMAIL_INDEX)?.get(email.as_bytes())? {
        Some(id) => Ok(Some(Uuid::from_slice(&id)?)),
        None => Ok(None),
    }
}

/// Read-modify-write of a single subscriber inside a transaction.
fn update<F>(db: &Database, id: Uuid, f: F) -> Result<Subscriber>
where
    F: Fn(&mut Subscriber) -> Result<()>,
{
    let subscribers = db.tree::<Subscriber>()?;
    let subscriber = subscribers.transaction(|tree| {
        let bytes = tree
            .get(id.as_bytes())?
            .ok_or_else(|| abort(ErrorKind::NotFound(format!("subscriber {id}"))))?;
        let mut subscriber: Subscriber = decode(&bytes).map_err(abort)?;
        f(&mut subscriber).map_err(abort)?;
        tree.insert(&id.as_bytes()[..], encode(&subscriber).map_err(abort)?)?;
        Ok(subscriber)
    })?;
    Ok(subscriber)
}

/// Subscribers filtered by status and search, newest subscription first.
pub fn list(db: &Database, query: &ListQuery) -> Result<Page<Subscriber>> {
    let status = query.status::<SubscriberStatus>()?;
    let mut subscribers = db
        .get_collection::<Subscriber>()?
        .into_iter()
        .filter(|s| status.map_or(true, |status| s.status == status))
        .filter(|s| crate::util::matches_search(query.search(), &[&s.email, &s.name]))
        .collect::<Vec<_>>();
    subscribers.sort_by(|a, b| {
        b.subscribed_at
            .cmp(&a.subscribed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(paginate(subscribers, query.page(), query.limit()))
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStats {
    pub total: usize,
    pub active: usize,
    pub unsubscribed: usize,
    pub bounced: usize,
    pub by_source: BTreeMap<SubscriberSource, usize>,
    /// Active subscribers who joined within the recent window.
    pub recent: usize,
    pub recent_days: i64,
}

pub fn stats(db: &Database, recent_days: i64) -> Result<SubscriberStats> {
    let since = Utc::now() - Duration::days(recent_days);
    let mut stats = SubscriberStats {
        recent_days,
        ..Default::default()
    };
    for subscriber in db.get_collection::<Subscriber>()? {
        stats.total += 1;
        match subscriber.status {
            SubscriberStatus::Active => stats.active += 1,
            SubscriberStatus::Unsubscribed => stats.unsubscribed += 1,
            SubscriberStatus::Bounced => stats.bounced += 1,
        }
        *stats.by_source.entry(subscriber.source).or_default() += 1;
        if subscriber.is_active() && subscriber.subscribed_at >= since {
            stats.recent += 1;
        }
    }
    Ok(stats)
}
