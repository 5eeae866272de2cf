//! Self-service HTTP API.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - `GET /me`: The caller's account and balance
//! - `GET /me/credit_transactions`: The caller's ledger, newest first
//!
//! Both require the same API key as the relay routes. Rule, channel and user administration
//! is done outside this service.

pub mod handlers;
pub mod models;
