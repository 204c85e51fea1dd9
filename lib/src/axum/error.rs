use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::{Error, ErrorKind};

use super::Reply;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::BadInput(_)
            | ErrorKind::EmptyAudience
            | ErrorKind::AlreadySubscribed(_)
            | ErrorKind::AlreadyUnsubscribed(_) => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Turns every error into the JSON envelope with `success: false`.
///
/// # Error message stripping in production
///
/// When compiled with optimizations ("release mode") server-side failures are
/// reported with a generic message. Details and the backtrace are only ever
/// available through the application logs. Transport failures are the
/// exception, their cause is what the operator needs to see.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, error) = if self.is_client_error() {
            tracing::debug!("{}", self.kind);
            (self.kind.to_string(), None)
        } else if let ErrorKind::TransportUnavailable(cause) = &self.kind {
            tracing::error!("{}", self);
            ("mail transport unavailable".to_string(), Some(cause.clone()))
        } else {
            tracing::error!("{}", self);
            let detail = cfg!(debug_assertions).then(|| self.kind.to_string());
            ("internal server error".to_string(), detail)
        };

        Reply::<()> {
            success: false,
            message: Some(message),
            data: None,
            error,
            status,
        }
        .into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(e: JsonRejection) -> Self {
        Self::new(ErrorKind::BadInput(e.body_text()))
    }
}

impl From<QueryRejection> for Error {
    fn from(e: QueryRejection) -> Self {
        Self::new(ErrorKind::BadInput(e.body_text()))
    }
}

impl From<PathRejection> for Error {
    fn from(e: PathRejection) -> Self {
        Self::new(ErrorKind::BadInput(e.body_text()))
    }
}
