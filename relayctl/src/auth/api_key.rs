//! Per-user API key authentication.
//!
//! Keys are presented as `Authorization: Bearer <key>` or, for Anthropic-style clients,
//! `x-api-key: <key>`. Only the lowercase hex SHA-256 digest of a key is stored, so a lookup
//! hashes the presented key and matches `users.api_key_hash`.

use super::{CurrentUser, IdentityResolver};
use crate::db::errors::DbError;
use crate::db::handlers::Users;
use crate::db::models::users::{User, UserStatus};
use crate::errors::{Error, Result};
use crate::ledger::InMemoryLedger;
use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{instrument, trace};

/// Lookup of accounts by API key digest.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_api_key_hash(&self, hash: &str) -> std::result::Result<Option<User>, DbError>;
}

pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_by_api_key_hash(&self, hash: &str) -> std::result::Result<Option<User>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_by_api_key_hash(hash).await
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryLedger {
    async fn find_by_api_key_hash(&self, hash: &str) -> std::result::Result<Option<User>, DbError> {
        Ok(InMemoryLedger::find_by_api_key_hash(self, hash))
    }
}

/// Lowercase hex SHA-256 of an API key, as stored in `users.api_key_hash`.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Token of a `Bearer` authorization value. The scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim_start().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// The key presented by the caller, if any. A non-bearer `Authorization` header does not
/// shadow `x-api-key`.
fn presented_key(headers: &HeaderMap) -> Result<Option<&str>> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|e| Error::BadRequest {
            message: format!("Invalid authorization header: {e}"),
        })?;
        if let Some(token) = bearer_token(value) {
            return Ok(Some(token));
        }
    }

    match headers.get("x-api-key") {
        Some(value) => value.to_str().map(|v| Some(v.trim())).map_err(|e| Error::BadRequest {
            message: format!("Invalid x-api-key header: {e}"),
        }),
        None => Ok(None),
    }
}

pub struct ApiKeyIdentity {
    directory: Arc<dyn UserDirectory>,
    prefix: String,
}

impl ApiKeyIdentity {
    pub fn new(directory: Arc<dyn UserDirectory>, prefix: impl Into<String>) -> Self {
        Self {
            directory,
            prefix: prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityResolver for ApiKeyIdentity {
    #[instrument(skip_all)]
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<CurrentUser>> {
        let Some(key) = presented_key(headers)? else {
            trace!("No API key presented");
            return Ok(None);
        };

        let invalid = || Error::Unauthenticated {
            message: Some("Invalid API key".to_string()),
        };

        if !key.starts_with(&self.prefix) || key.len() == self.prefix.len() {
            return Err(invalid());
        }

        let user = self.directory.find_by_api_key_hash(&hash_api_key(key)).await?.ok_or_else(invalid)?;

        if user.status == UserStatus::Disabled {
            return Err(Error::Forbidden {
                message: "User account is disabled".to_string(),
            });
        }

        trace!(user_id = user.id, "Resolved API key");
        Ok(Some(CurrentUser::from(&user)))
    }
}
