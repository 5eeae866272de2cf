//! Database record models matching table schemas.
//!
//! This module contains struct definitions that directly correspond to database
//! table rows. These models are used by repositories to return query results
//! and by the in-memory stores that stand in for PostgreSQL in tests.
//!
//! # Model Categories
//!
//! - [`users`]: User accounts with tier and prepaid balance
//! - [`credits`]: Credit ledger rows and their lifecycle states
//! - [`rules`]: Credit cost and quota rules (prefix matched)
//! - [`channels`]: Upstream provider channels
//! - [`api_logs`]: Audit records for relayed calls

pub mod api_logs;
pub mod channels;
pub mod credits;
pub mod rules;
pub mod users;
