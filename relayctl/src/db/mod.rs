//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! It follows the Repository pattern to provide clean abstractions over database operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Ledger / Catalog /   │  (trait implementations used by the pipeline)
//! │ Audit / Identity     │
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │ Repositories         │  (db::handlers - queries)
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │ Models               │  (db::models - database records)
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │ PostgreSQL           │
//! └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! ## Example Usage
//!
//! ```ignore
//! use relayctl::db::handlers::Credits;
//!
//! let mut conn = pool.acquire().await?;
//! let outcome = Credits::new(&mut conn).reserve(user_id, "gpt-4o", 5, request_id).await?;
//! ```
//!
//! # Balance changes
//!
//! Every statement that changes `users.credits` is a single conditional `UPDATE` executed in
//! the same transaction as the `credit_transactions` row that records it. Repositories never
//! read a balance and write it back.
//!
//! # Migrations
//!
//! Database migrations are managed by SQLx and located in the `migrations/` directory.
//! The [`crate::migrator`] function provides access to the migrator:
//!
//! ```ignore
//! relayctl::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
