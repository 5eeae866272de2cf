use crate::db::models::users::{Role, User};
use crate::errors::Error;
use crate::types::{Level, UserId};
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

/// The authenticated caller, as seen by the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub role: Role,
    pub level: Level,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            level: user.level,
        }
    }
}

/// Reads the identity placed in the request extensions by [`super::middleware::require_user`].
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(Error::Unauthenticated { message: None })
    }
}
