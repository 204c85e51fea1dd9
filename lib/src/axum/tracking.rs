use axum::extract::Path;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Extension;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};

use crate::email::pixel;
use crate::{Campaign, Config};

use super::{DbExt, Router};

pub fn router(config: &Config) -> Router {
    Router::new().route(&config.mailing.tracking_route(), get(track_email))
}

/// Records an open and serves the tracking pixel. Never fails from the
/// client's point of view.
pub async fn track_email(
    Extension(db): DbExt,
    Path(tracking_id): Path<String>,
) -> impl IntoResponse {
    match Campaign::track_open(&db, &tracking_id) {
        Ok(true) => tracing::debug!(%tracking_id, "email opened"),
        Ok(false) => tracing::trace!(%tracking_id, "tracking hit without effect"),
        Err(e) => tracing::error!(%tracking_id, "failed tracking email open: {e}"),
    }

    (
        [
            (CONTENT_TYPE, mime::IMAGE_PNG.as_ref()),
            (CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (PRAGMA, "no-cache"),
            (EXPIRES, "0"),
        ],
        pixel::png(),
    )
}
