//! Caller identity for the relay and self-service routes.
//!
//! Identity resolution sits in front of the admission pipeline. The [`middleware`] resolves
//! the caller through an [`IdentityResolver`] and stores a [`CurrentUser`] in the request
//! extensions; handlers then take `CurrentUser` as an extractor.
//!
//! # Modules
//!
//! - [`current_user`]: The per-request identity and its extractor
//! - [`api_key`]: Default resolver, hashed per-user API keys
//! - [`middleware`]: Route protection middleware
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use relayctl::auth::CurrentUser;
//!
//! async fn handler(user: CurrentUser) -> String {
//!     format!("user {} at level {}", user.id, user.level)
//! }
//! ```

use crate::errors::Result;
use axum::http::HeaderMap;

pub mod api_key;
pub mod current_user;
pub mod middleware;

pub use api_key::{ApiKeyIdentity, PostgresUserDirectory, UserDirectory};
pub use current_user::CurrentUser;

/// Resolves the caller of a request from its headers.
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    /// - `Ok(None)`: no credentials were presented
    /// - `Ok(Some(user))`: credentials are valid and the account may use the gateway
    /// - `Err(_)`: credentials were presented but rejected, or the lookup failed
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<CurrentUser>>;
}
