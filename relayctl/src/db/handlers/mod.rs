//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open transaction),
//! binds parameters, and returns models from [`crate::db::models`].
//!
//! # Available Repositories
//!
//! - [`Users`]: Accounts and API-key lookup
//! - [`Credits`]: The credit ledger (reserve / commit / revert / adjust)
//! - [`Rules`]: Credit cost and quota rules
//! - [`Channels`]: Upstream channels
//! - [`ApiLogs`]: Audit log inserts
//!
//! ```ignore
//! use relayctl::db::handlers::{Repository, Users};
//!
//! let mut conn = pool.acquire().await?;
//! let user = Users::new(&mut conn).get_by_id(42).await?;
//! ```

pub mod api_logs;
pub mod channels;
pub mod credits;
pub mod repository;
pub mod rules;
pub mod users;

pub use api_logs::ApiLogs;
pub use channels::Channels;
pub use credits::Credits;
pub use repository::Repository;
pub use rules::Rules;
pub use users::Users;
