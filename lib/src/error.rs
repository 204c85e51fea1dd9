use std::backtrace::Backtrace;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};

use sled::transaction::TransactionError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub backtrace: Backtrace,
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Client errors are the caller's fault and map onto 4xx responses.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::BadInput(_)
                | ErrorKind::EmptyAudience
                | ErrorKind::AlreadySubscribed(_)
                | ErrorKind::AlreadyUnsubscribed(_)
                | ErrorKind::NotFound(_)
                | ErrorKind::Unauthorized
                | ErrorKind::Forbidden
        )
    }

    /// Rewraps a failed transport check, keeping the original cause.
    pub fn transport_unavailable(self) -> Self {
        match self.kind {
            ErrorKind::TransportUnavailable(_) => self,
            kind => Self::new(ErrorKind::TransportUnavailable(kind.to_string())),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, ", {}", self.backtrace)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("unexpected error")]
    StdIoError(#[from] std::io::Error),

    #[error("config error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("bad input: {0}")]
    BadInput(String),
    #[error("no recipients match the selected audience")]
    EmptyAudience,
    #[error("email is already subscribed: {0}")]
    AlreadySubscribed(String),
    #[error("email is already unsubscribed: {0}")]
    AlreadyUnsubscribed(String),
    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing admin token")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,

    #[error("lettre email error: {0}")]
    LettreEmailError(#[from] lettre::error::Error),
    #[error("lettre smtp error: {0}")]
    LettreSmtpError(#[from] lettre::transport::smtp::Error),
    #[error("failed parsing email address: {0}")]
    EmailParseError(String),
    #[error("failed sending email through smtp: {0}")]
    EmailBadResponse(String),
    #[error("mail transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("db error: {0}")]
    DbError(String),
    #[error("sled db error: {0}")]
    SledError(#[from] sled::Error),
    #[error("sled transaction error: {0}")]
    SledTransactionError(String),

    #[error("pot decode error: {0}")]
    PotError(#[from] pot::Error),
    #[error("image encode error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("uuid error: {0}")]
    UuidError(#[from] uuid::Error),
    #[error("url parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("other error: {0}")]
    Other(String),

    #[error("infallible?")]
    Infallible(#[from] Infallible),
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Self::new(ErrorKind::Other(e))
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Self::new(ErrorKind::UuidError(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Self::new(ErrorKind::SledError(e))
    }
}

/// Aborted transactions carry our own error, storage failures are wrapped.
impl From<TransactionError<Error>> for Error {
    fn from(e: TransactionError<Error>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => {
                Self::new(ErrorKind::SledTransactionError(e.to_string()))
            }
        }
    }
}

impl From<pot::Error> for Error {
    fn from(e: pot::Error) -> Self {
        Self::new(ErrorKind::PotError(e))
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Self::new(ErrorKind::ImageError(e))
    }
}

impl From<lettre::error::Error> for Error {
    fn from(e: lettre::error::Error) -> Self {
        Self::new(ErrorKind::LettreEmailError(e))
    }
}

impl From<lettre::transport::smtp::Error> for Error {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self::new(ErrorKind::LettreSmtpError(e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::new(ErrorKind::UrlParseError(e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::new(ErrorKind::ConfigError(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::StdIoError(e))
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        Self::new(ErrorKind::Infallible(e))
    }
}

impl From<ErrorKind> for Error {
    fn from(k: ErrorKind) -> Self {
        Self::new(k)
    }
}
