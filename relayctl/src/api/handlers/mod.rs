//! HTTP request handlers for the self-service endpoints.
//!
//! - [`users`]: The caller's account
//! - [`transactions`]: The caller's credit ledger
//!
//! Handlers take [`crate::auth::CurrentUser`] and only ever read the caller's own data.
//! They return [`crate::errors::Error`], which converts to a JSON error response.

pub mod transactions;
pub mod users;
