//! HTTP interface built on `axum`.
//!
//! Handlers get their dependencies through request extensions: the shared
//! config, the database handle and the mail transport. Every JSON response
//! goes out in the same envelope, see [`Reply`].

pub mod bulk;
pub mod error;
pub mod extract;
pub mod mailing;
pub mod tracking;

pub use extract::Admin;

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{Config, Database, Mailer, Result, SmtpMailer};

pub type Router = axum::Router;

pub type ConfigExt<C = Config> = Extension<Arc<C>>;
pub type DbExt = Extension<Database>;
pub type MailerExt = Extension<Arc<dyn Mailer>>;

/// Response envelope shared by all JSON endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct Reply<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: serde::Serialize> Reply<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
            status: StatusCode::OK,
        }
    }

    pub fn created(data: T) -> Self {
        Self::data(data).status(StatusCode::CREATED)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl Reply<()> {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
            status: StatusCode::OK,
        }
    }
}

impl<T: serde::Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Collects all the application routes. The tracking endpoint is mounted
/// wherever the config points outgoing pixels to.
pub fn router(config: &Config) -> Router {
    Router::new()
        .merge(mailing::router())
        .merge(tracking::router(config))
        .merge(bulk::router())
}

/// Builds the application with all shared state attached.
pub fn app(config: Arc<Config>, db: Database, mailer: Arc<dyn Mailer>) -> Router {
    router(&config)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(mailer))
        .layer(Extension(db))
        .layer(Extension(config))
}

/// Opens the database and the smtp transport described by the config and
/// starts the web server.
pub async fn start(config: Config) -> Result<()> {
    let db = Database::new(&config.db)?;
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&config)?);
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });
    start_with(db, mailer, config, cancel).await
}

/// Initializes application state, spawns the campaign scheduler and serves
/// the application until `cancel` fires.
pub async fn start_with(
    db: Database,
    mailer: Arc<dyn Mailer>,
    config: Config,
    cancel: CancellationToken,
) -> Result<()> {
    crate::tracing::init(&config).unwrap_or_else(|e| {
        log::warn!("failed to initialize tracing (perhaps it was already initialized?): {e}")
    });

    // Provide initial state as defined in config
    crate::init::initialize(&config, &db)?;

    // Populate the database with generated subscribers and contacts
    if config.dev.enabled && config.dev.mock {
        crate::mock::generate(&config, &db)?;
    }

    let config = Arc::new(config);
    let addr = config.address;

    tokio::spawn(crate::scheduler::run(
        db.clone(),
        mailer.clone(),
        config.clone(),
        cancel.clone(),
    ));

    let router = app(config, db.clone(), mailer);

    tracing::info!("starting server at {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    db.flush().await?;
    Ok(())
}
