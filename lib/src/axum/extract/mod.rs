use std::ops::Deref;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum_auth::AuthBearer;

use crate::config::Admin as AdminIdentity;
use crate::error::{Error, ErrorKind};
use crate::Config;

/// Json body with rejections reported through the response envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct Body<T>(pub T);

/// Query string with rejections reported through the response envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct Params<T>(pub T);

/// Path parameters with rejections reported through the response envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct Id<T>(pub T);

/// Admin making the request, identified by the bearer token.
#[derive(Clone, Debug)]
pub struct Admin(pub AdminIdentity);

impl Deref for Admin {
    type Target = AdminIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<Arc<Config>>()
            .cloned()
            .ok_or_else(|| ErrorKind::Other("config extension unavailable".to_string()))?;

        let AuthBearer(token) = AuthBearer::from_request_parts(parts, state)
            .await
            .map_err(|_| ErrorKind::Unauthorized)?;

        match config.find_admin(&token) {
            Some(admin) => Ok(Admin(admin.clone())),
            None => {
                tracing::debug!("rejected unknown admin token");
                Err(ErrorKind::Forbidden.into())
            }
        }
    }
}
