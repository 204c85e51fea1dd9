//! Newsletter subscriptions, bulk email campaigns and delivery tracking.
//!
//! The library covers the whole path of a bulk send: resolving an audience
//! into a concrete recipient list, persisting a delivery log before anything
//! goes out, pushing the messages through an injected mail transport in
//! paced batches, and counting opens through a tracking pixel.
//!
//! Everything is exposed over HTTP through the [`axum`] module, which also
//! provides the [`axum::start`] entry point used by the cli.

#[macro_use]
extern crate serde_derive;

pub mod audience;
pub mod axum;
pub mod campaign;
pub mod config;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod email;
pub mod email_log;
pub mod error;
pub mod init;
pub mod mock;
pub mod query;
pub mod routes;
pub mod scheduler;
pub mod tracing;
pub mod util;

pub use campaign::{Campaign, CampaignStatus, Recipient, RecipientStatus};
pub use config::Config;
pub use db::Database;
pub use directory::{Contact, RecipientType};
pub use email::list::{Subscriber, SubscriberStatus};
pub use email::{Mailer, SmtpMailer};
pub use email_log::EmailLog;
pub use error::{Error, ErrorKind, Result};
