//! Module tasked with generating mock data to populate the application.

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::directory::RecipientType;
use crate::email::list::{self, SubscribeRequest, Subscriber, SubscriberSource};
use crate::{Config, Contact, Database, Result};

const FIRST_NAMES: &[&str] = &["Asha", "Ravi", "Meera", "Karan", "Nisha", "Vikram", "Priya", "Arjun"];
const TAGS: &[&str] = &["gst", "accounting", "tally", "payroll", "excel"];

/// Generates and saves various mocking data in the database.
pub fn generate(config: &Config, db: &Database) -> Result<()> {
    if db.len::<Subscriber>()? > 0 {
        tracing::debug!("database already populated, skipping mock data");
        return Ok(());
    }
    subscribers(config, db, 24)?;
    contacts(db)?;
    Ok(())
}

/// Subscribes `count` generated addresses, spread over the last two
/// recent-windows so that the `recent` audience has something to match.
pub fn subscribers(config: &Config, db: &Database, count: usize) -> Result<Vec<Subscriber>> {
    let mut rng = rand::thread_rng();
    let sources = [
        SubscriberSource::Newsletter,
        SubscriberSource::Contact,
        SubscriberSource::Course,
        SubscriberSource::Other,
    ];

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let name = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("Test");
        let tag_count = rng.gen_range(0..3);
        let tags = TAGS
            .choose_multiple(&mut rng, tag_count)
            .map(|t| t.to_string())
            .collect();
        let subscription = list::subscribe(
            db,
            SubscribeRequest {
                email: format!("{}.{i}@mail.test", name.to_lowercase()),
                name: Some(name.to_string()),
                source: sources.choose(&mut rng).copied(),
                tags,
                ..Default::default()
            },
        )?;

        let mut subscriber = subscription.subscriber().clone();
        let days = rng.gen_range(0..config.mailing.recent_days.max(1) * 2);
        subscriber.subscribed_at = Utc::now() - Duration::days(days);
        subscriber.created_at = subscriber.subscribed_at;
        db.set(&subscriber)?;
        if i % 7 == 6 {
            subscriber = list::unsubscribe(db, &subscriber.email)?;
        }
        out.push(subscriber);
    }
    Ok(out)
}

pub fn contacts(db: &Database) -> Result<()> {
    for (i, kind) in RecipientType::all()
        .into_iter()
        .filter(|k| *k != RecipientType::Newsletter)
        .enumerate()
    {
        for n in 0..2 {
            Contact::upsert(
                db,
                &format!("{}{n}@directory.test", kind.as_ref().to_lowercase()),
                &format!("{kind} {}", i * 2 + n),
                kind,
            )?;
        }
    }
    Ok(())
}
