//! Database repository for upstream channels.

use crate::db::{
    errors::Result,
    models::channels::{Channel, ChannelStatus},
};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Channels<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Channels<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Enabled channels in ascending id order
    #[instrument(skip(self), err)]
    pub async fn list_enabled(&mut self) -> Result<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, name, base_url, api_key, models, status
            FROM channels
            WHERE status = $1
            ORDER BY id ASC
            "#,
        )
        .bind(ChannelStatus::Enabled)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(channels)
    }

    #[instrument(skip(self, api_key), err)]
    pub async fn create(
        &mut self,
        name: &str,
        base_url: &str,
        api_key: &str,
        models: &[String],
        status: ChannelStatus,
    ) -> Result<Channel> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            INSERT INTO channels (name, base_url, api_key, models, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, base_url, api_key, models, status
            "#,
        )
        .bind(name)
        .bind(base_url)
        .bind(api_key)
        .bind(sqlx::types::Json(models))
        .bind(status)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(channel)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test(migrations = "./migrations")]
    async fn test_list_enabled_skips_disabled(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Channels::new(&mut conn);

        let models = vec!["gpt-4o".to_string()];
        repo.create("off", "http://a", "k1", &models, ChannelStatus::Disabled).await.unwrap();
        let on = repo.create("on", "http://b", "k2", &models, ChannelStatus::Enabled).await.unwrap();

        let enabled = repo.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, on.id);
        assert!(enabled[0].supports("gpt-4o"));
    }
}
