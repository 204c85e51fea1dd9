//! Data initialization procedures.
//!
//! The app config can list directory contacts expected to exist after the
//! application is started. This module turns those entries into initial
//! application state.

use crate::{Config, Contact, Database, Result};

/// Initializes database state based on entries found in the configuration.
pub fn initialize(config: &Config, db: &Database) -> Result<()> {
    contacts(config, db)?;
    Ok(())
}

/// Upserts the directory contacts listed in the configuration. Existing
/// entries with the same address and type get their name updated.
pub fn contacts(config: &Config, db: &Database) -> Result<()> {
    for contact in &config.contacts {
        Contact::upsert(db, &contact.email, &contact.name, contact.kind)?;
    }
    if !config.contacts.is_empty() {
        tracing::info!(count = config.contacts.len(), "initialized directory contacts");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitContact;
    use crate::directory::RecipientType;

    #[test]
    fn repeated_initialization_does_not_duplicate() {
        let db = Database::temporary().unwrap();
        let config = Config {
            contacts: vec![InitContact {
                email: "Dean@College.edu".to_string(),
                name: "Dean".to_string(),
                kind: RecipientType::College,
            }],
            ..Default::default()
        };
        initialize(&config, &db).unwrap();
        initialize(&config, &db).unwrap();

        let contacts = db.get_collection::<Contact>().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email, "dean@college.edu");
    }
}
