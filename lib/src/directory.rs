//! Directory of addressable contacts.
//!
//! The generic bulk email flow targets people by type rather than by
//! newsletter subscription. Students, teachers, colleges, companies and
//! individuals are kept here; the `Newsletter` type is backed by active
//! [`Subscriber`](crate::Subscriber)s instead.

use chrono::{DateTime, Utc};
use sled::Transactional;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

use crate::db::{abort, decode, encode, Collectable, Identifiable};
use crate::{Database, ErrorKind, Result};

/// Tree mapping `kind:address` to contact ids.
const CONTACT_INDEX: &str = "contact_emails";

fn index_key(kind: RecipientType, email: &str) -> String {
    format!("{}:{}", kind.as_ref(), email)
}

#[derive(
    Clone,
    Copy,
    Debug,
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
pub enum RecipientType {
    Student,
    Teacher,
    College,
    Company,
    Individual,
    Newsletter,
}

impl RecipientType {
    pub fn all() -> Vec<RecipientType> {
        RecipientType::iter().collect()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub kind: RecipientType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Collectable for Contact {
    fn get_collection_name() -> &'static str {
        "contacts"
    }
}

impl Identifiable for Contact {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Contact {
    /// Adds a contact, or updates the name of an existing contact with the
    /// same address and type. The address index and the row are written in
    /// one transaction, so concurrent upserts of the same contact converge on
    /// a single row.
    pub fn upsert(db: &Database, email: &str, name: &str, kind: RecipientType) -> Result<Contact> {
        if kind == RecipientType::Newsletter {
            return Err(ErrorKind::BadInput(
                "newsletter recipients are managed through subscriptions".to_string(),
            )
            .into());
        }
        let email = crate::util::normalize_email(email)?;
        let key = index_key(kind, &email);
        let index = db.tree_at(CONTACT_INDEX)?;
        let contacts = db.tree::<Contact>()?;

        let contact = (&index, &contacts).transaction(|(index, contacts)| {
            let contact = match index.get(key.as_bytes())? {
                Some(id) => {
                    let id = Uuid::from_slice(&id).map_err(abort)?;
                    let bytes = contacts.get(id.as_bytes())?.ok_or_else(|| {
                        abort(ErrorKind::DbError(format!("dangling contact index for {email}")))
                    })?;
                    let mut contact: Contact = decode(&bytes).map_err(abort)?;
                    if !name.is_empty() {
                        contact.name = name.to_string();
                    }
                    contact.active = true;
                    contact
                }
                None => {
                    let contact = Contact {
                        id: Uuid::new_v4(),
                        email: email.clone(),
                        name: name.to_string(),
                        kind,
                        active: true,
                        created_at: Utc::now(),
                    };
                    index.insert(key.as_bytes(), &contact.id.as_bytes()[..])?;
                    contact
                }
            };
            contacts.insert(&contact.id.as_bytes()[..], encode(&contact).map_err(abort)?)?;
            Ok(contact)
        })?;
        Ok(contact)
    }

    /// Active contacts of the given types, oldest first.
    pub fn active_of(db: &Database, kinds: &[RecipientType]) -> Result<Vec<Contact>> {
        let mut contacts = db
            .get_collection::<Contact>()?
            .into_iter()
            .filter(|c| c.active && kinds.contains(&c.kind))
            .collect::<Vec<_>>();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_existing_contact() {
        let db = Database::temporary().unwrap();
        let first = Contact::upsert(&db, "Dean@Uni.edu", "", RecipientType::College).unwrap();
        let second = Contact::upsert(&db, "dean@uni.edu", "Dean", RecipientType::College).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.len::<Contact>().unwrap(), 1);
        assert_eq!(db.get::<Contact>(first.id).unwrap().name, "Dean");
    }

    #[test]
    fn concurrent_upserts_keep_a_single_row() {
        let db = Database::temporary().unwrap();
        let handles = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    Contact::upsert(&db, "hr@corp.com", &format!("HR {i}"), RecipientType::Company)
                        .unwrap()
                        .id
                })
            })
            .collect::<Vec<_>>();
        let ids = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<std::collections::HashSet<_>>();

        assert_eq!(ids.len(), 1);
        assert_eq!(db.len::<Contact>().unwrap(), 1);
        let other = Contact::upsert(&db, "hr@corp.com", "", RecipientType::College).unwrap();
        assert!(!ids.contains(&other.id));
        assert_eq!(db.len::<Contact>().unwrap(), 2);
    }

    #[test]
    fn newsletter_contacts_are_rejected() {
        let db = Database::temporary().unwrap();
        assert!(Contact::upsert(&db, "a@x.com", "A", RecipientType::Newsletter).is_err());
    }

    #[test]
    fn types_parse_from_names() {
        assert_eq!("Company".parse::<RecipientType>().unwrap(), RecipientType::Company);
        assert_eq!(RecipientType::all().len(), 6);
    }
}
