use super::Catalog;
use crate::db::errors::DbError;
use crate::db::handlers::{Channels, Rules};
use crate::db::models::{
    channels::Channel,
    rules::{ModelCreditRule, QuotaRule},
};
use crate::types::Level;
use sqlx::PgPool;

/// Catalog backed by the `model_credit_rules`, `quota_rules` and `channels` tables.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Catalog for PostgresCatalog {
    async fn credit_rules(&self) -> Result<Vec<ModelCreditRule>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Rules::new(&mut conn).list_credit_rules().await
    }

    async fn quota_rules(&self, level: Level) -> Result<Vec<QuotaRule>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Rules::new(&mut conn).list_quota_rules(level).await
    }

    async fn enabled_channels(&self) -> Result<Vec<Channel>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Channels::new(&mut conn).list_enabled().await
    }
}
