use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::directory::RecipientType;
use crate::Result;

pub static CONFIG_FILE: &'static str = "mailroom.toml";

/// Application configuration.
///
/// # Sensible defaults
///
/// `Config::default()` gives a working local setup: the server listens on
/// `127.0.0.1:8080`, the database lives in `./db` and batches of 10 messages
/// go out once per second. Use the *struct update syntax* to tweak just a few
/// values.
///
/// ```ignore
/// let cfg = Config {
///     mailing: Mailing {
///         batch_size: 25,
///         ..Default::default()
///     },
///     ..Default::default()
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub version: String,

    /// Domain used for `Message-ID` headers and the `noreply` reply-to
    /// address.
    pub domain: String,
    /// Address on which to serve the application. Defaults to
    /// `127.0.0.1:8080`.
    pub address: SocketAddr,
    /// Publicly reachable base url, used to build tracking pixel links.
    pub frontend_url: String,

    pub db: Db,
    pub tracing: Tracing,

    pub email: Email,
    pub mailing: Mailing,

    /// Static admin identities allowed to use the admin endpoints.
    pub admins: Vec<Admin>,
    /// Directory entries upserted on startup.
    pub contacts: Vec<InitContact>,

    /// Development mode configuration.
    pub dev: DevMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "localhost".to_string(),
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            frontend_url: "http://localhost:8080".to_string(),
            db: Db::default(),
            tracing: Tracing::default(),
            email: Email::default(),
            mailing: Mailing::default(),
            admins: vec![],
            contacts: vec![],
            dev: DevMode::default(),
        }
    }
}

impl Config {
    /// Applies the plain environment variables understood by the deployment
    /// scripts on top of whatever was loaded from files.
    pub fn apply_env(mut self) -> Self {
        if let Ok(user) = std::env::var("EMAIL_USER") {
            if self.email.address.is_empty() {
                self.email.address = user.clone();
            }
            self.email.smtp_user = user;
        }
        if let Ok(pass) = std::env::var("EMAIL_PASS") {
            self.email.smtp_password = pass;
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            self.frontend_url = url;
        }
        self
    }

    pub fn find_admin(&self, token: &str) -> Option<&Admin> {
        self.admins
            .iter()
            .find(|a| !a.token.is_empty() && a.token == token)
    }
}

/// Loads application config from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads application config from toml file at standard path using provided
/// name.
///
/// For example for `name` == `mailroom.toml` we will load both
/// `mailroom.toml` and `secret.mailroom.toml` from the working directory.
/// Values can be overridden with `MAILROOM__SECTION__KEY` environment
/// variables.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(
            config::Environment::with_prefix("MAILROOM")
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Db {
    /// Path to the database directory, relative to the working directory.
    pub path: String,
    /// Use a throwaway database that is removed once dropped.
    pub temporary: bool,
}

impl Default for Db {
    fn default() -> Self {
        Self {
            path: "db".to_string(),
            temporary: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,

    pub loki_address: String,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
            loki_address: "".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Email {
    /// Address the application sends from.
    pub address: String,

    // Smtp server and credentials.
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            address: String::new(),
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_password: String::new(),
        }
    }
}

/// Bulk sending policy.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Mailing {
    /// Number of messages sent concurrently before pausing.
    pub batch_size: usize,
    /// Pause between consecutive batches, in milliseconds.
    pub batch_delay_ms: u64,

    /// Append an open-tracking pixel to html campaign messages.
    pub tracking: bool,
    /// Path of the tracking endpoint, appended to `frontend_url`.
    pub tracking_path: String,

    /// Window used by the `recent` audience and the stats endpoint.
    pub recent_days: i64,

    /// How often to look for scheduled campaigns that became due.
    pub schedule_interval_secs: u64,
}

impl Default for Mailing {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 1000,
            tracking: true,
            tracking_path: crate::routes::TRACK_EMAIL.to_string(),
            recent_days: 30,
            schedule_interval_secs: 60,
        }
    }
}

impl Mailing {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Normalized tracking path, falling back to the default endpoint when
    /// left blank.
    pub fn tracking_base(&self) -> String {
        match self.tracking_path.trim_matches('/') {
            "" => crate::routes::TRACK_EMAIL.to_string(),
            path => format!("/{path}"),
        }
    }

    /// Route the tracking endpoint is mounted at, matching the links built
    /// for outgoing pixels. Must not shadow another route.
    pub fn tracking_route(&self) -> String {
        format!("{}/:tracking_id", self.tracking_base())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Admin {
    pub name: String,
    pub email: String,
    /// Bearer token presented by the admin dashboard.
    pub token: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InitContact {
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub kind: RecipientType,
}

/// NOTE: make sure to disable on production.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DevMode {
    /// Global switch for all dev mode items.
    pub enabled: bool,
    /// Populate the database with generated subscribers and contacts.
    pub mock: bool,
}
