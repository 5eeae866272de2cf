//! Common type definitions.
//!
//! # ID Types
//!
//! Entity IDs are `BIGSERIAL` keys wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`TransactionId`]: Credit ledger row identifier
//! - [`ChannelId`]: Upstream channel identifier
//!
//! Relay attempts are identified by a random [`RequestId`] which doubles as the
//! idempotency key of the reservation they create.

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = i64;
pub type TransactionId = i64;
pub type ChannelId = i64;
pub type RuleId = i64;
pub type RequestId = Uuid;

/// User tier used to scope quota rules.
pub type Level = i32;
