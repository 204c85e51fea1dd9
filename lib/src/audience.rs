//! Audience resolution.
//!
//! Turns an audience selector into the concrete, de-duplicated list of
//! addresses a send job goes out to. Nothing here writes to the database.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use strum::{AsRefStr, Display, EnumString};

use crate::directory::{Contact, RecipientType};
use crate::email::list::{Subscriber, SubscriberSource, SubscriberStatus};
use crate::{Database, ErrorKind, Result};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetAudience {
    /// Every active subscriber.
    #[default]
    All,
    /// Same set as `All`.
    Active,
    /// Active subscribers who joined within the recent window.
    Recent,
    Custom,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomFilters {
    /// Statuses to include. Empty means active only.
    pub status: Vec<SubscriberStatus>,
    pub source: Vec<SubscriberSource>,
    /// Subscribers carrying any of these tags.
    pub tags: Vec<String>,
    pub subscribed_after: Option<DateTime<Utc>>,
    pub subscribed_before: Option<DateTime<Utc>>,
}

impl CustomFilters {
    fn matches(&self, subscriber: &Subscriber) -> bool {
        let status_ok = if self.status.is_empty() {
            subscriber.is_active()
        } else {
            self.status.contains(&subscriber.status)
        };
        status_ok
            && (self.source.is_empty() || self.source.contains(&subscriber.source))
            && (self.tags.is_empty() || self.tags.iter().any(|t| subscriber.tags.contains(t)))
            && self
                .subscribed_after
                .map_or(true, |after| subscriber.subscribed_at >= after)
            && self
                .subscribed_before
                .map_or(true, |before| subscriber.subscribed_at <= before)
    }
}

/// A resolved recipient.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Target {
    pub email: String,
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecipientType>,
}

/// Resolves newsletter subscribers for a campaign.
///
/// Output is ordered by subscription time, oldest first, and unique by
/// address. Fails with `EmptyAudience` when nobody matches.
pub fn resolve(
    subscribers: &[Subscriber],
    audience: TargetAudience,
    filters: Option<&CustomFilters>,
    now: DateTime<Utc>,
    recent_days: i64,
) -> Result<Vec<Target>> {
    let recent_since = now - Duration::days(recent_days);
    let default_filters = CustomFilters::default();

    let mut matching = subscribers
        .iter()
        .filter(|s| match audience {
            TargetAudience::All | TargetAudience::Active => s.is_active(),
            TargetAudience::Recent => s.is_active() && s.subscribed_at >= recent_since,
            TargetAudience::Custom => filters.unwrap_or(&default_filters).matches(s),
        })
        .collect::<Vec<_>>();
    matching.sort_by(|a, b| a.subscribed_at.cmp(&b.subscribed_at).then(a.id.cmp(&b.id)));

    let mut seen = HashSet::new();
    let targets = matching
        .into_iter()
        .filter(|s| seen.insert(s.email.to_lowercase()))
        .map(|s| Target {
            email: s.email.clone(),
            name: s.name.clone(),
            kind: Some(RecipientType::Newsletter),
        })
        .collect::<Vec<_>>();

    if targets.is_empty() {
        return Err(ErrorKind::EmptyAudience.into());
    }
    Ok(targets)
}

/// Collects every addressable recipient of the requested types, grouped by
/// type. An address listed under several types is kept in each group.
pub fn grouped(db: &Database, kinds: &[RecipientType]) -> Result<BTreeMap<RecipientType, Vec<Target>>> {
    let mut groups: BTreeMap<RecipientType, Vec<Target>> =
        kinds.iter().map(|k| (*k, Vec::new())).collect();

    for contact in Contact::active_of(db, kinds)? {
        if let Some(group) = groups.get_mut(&contact.kind) {
            group.push(Target {
                email: contact.email,
                name: contact.name,
                kind: Some(contact.kind),
            });
        }
    }

    if let Some(group) = groups.get_mut(&RecipientType::Newsletter) {
        let mut subscribers = db
            .get_collection::<Subscriber>()?
            .into_iter()
            .filter(Subscriber::is_active)
            .collect::<Vec<_>>();
        subscribers.sort_by(|a, b| a.subscribed_at.cmp(&b.subscribed_at));
        group.extend(subscribers.into_iter().map(|s| Target {
            email: s.email,
            name: s.name,
            kind: Some(RecipientType::Newsletter),
        }));
    }

    Ok(groups)
}

/// Flattens the typed groups into one send list, unique by address. The first
/// type an address appears under wins.
pub fn collect_typed(db: &Database, kinds: &[RecipientType]) -> Result<Vec<Target>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    // keep the caller's ordering of types
    let mut groups = grouped(db, kinds)?;
    for kind in kinds {
        if let Some(group) = groups.remove(kind) {
            targets.extend(
                group
                    .into_iter()
                    .filter(|t| seen.insert(t.email.to_lowercase())),
            );
        }
    }

    if targets.is_empty() {
        return Err(ErrorKind::EmptyAudience.into());
    }
    Ok(targets)
}
