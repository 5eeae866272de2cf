//! Read-only view of the rules and channels the relay pipeline consults.
//!
//! Rule and channel management lives outside this crate; the pipeline only ever reads. Every
//! implementation returns rules and channels in ascending id order, which is what makes
//! longest-prefix ties and channel selection deterministic.

use crate::db::errors::DbError;
use crate::db::models::{
    channels::Channel,
    rules::{ModelCreditRule, QuotaRule},
};
use crate::types::Level;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCatalog;
pub use postgres::PostgresCatalog;

#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// All credit cost rules
    async fn credit_rules(&self) -> Result<Vec<ModelCreditRule>, DbError>;

    /// Quota rules scoped to one user level
    async fn quota_rules(&self, level: Level) -> Result<Vec<QuotaRule>, DbError>;

    /// Channels with `status = enabled`
    async fn enabled_channels(&self) -> Result<Vec<Channel>, DbError>;
}
