pub const NEWSLETTER: &str = "/newsletter";
pub const SUBSCRIBE: &str = "/newsletter/subscribe";
pub const UNSUBSCRIBE: &str = "/newsletter/unsubscribe";
pub const NEWSLETTER_STATS: &str = "/newsletter/stats";
pub const SUBSCRIBER: &str = "/newsletter/:id";
pub const SUBSCRIBER_STATUS: &str = "/newsletter/:id/status";

pub const SEND_CAMPAIGN: &str = "/newsletter/send-bulk-email";
pub const CAMPAIGNS: &str = "/newsletter/campaigns";
pub const CAMPAIGN: &str = "/newsletter/campaigns/:id";

pub const TRACK_EMAIL: &str = "/newsletter/track-email";

pub const BULK_EMAILS: &str = "/bulk-email/emails";
pub const BULK_CONTACTS: &str = "/bulk-email/contacts";
pub const BULK_SEND: &str = "/bulk-email/send";
pub const BULK_TEST_SEND: &str = "/bulk-email/test-send";
pub const BULK_TEST_CONNECTION: &str = "/bulk-email/test-connection";
pub const BULK_LOGS: &str = "/bulk-email/logs";
pub const BULK_LOG: &str = "/bulk-email/logs/:id";
