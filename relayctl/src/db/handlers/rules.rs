//! Database repository for credit cost and quota rules.

use crate::db::{
    errors::Result,
    models::rules::{ModelCreditRule, QuotaRule},
};
use crate::types::Level;
use sqlx::PgConnection;
use tracing::instrument;

pub struct Rules<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Rules<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// All credit cost rules in ascending id order
    #[instrument(skip(self), err)]
    pub async fn list_credit_rules(&mut self) -> Result<Vec<ModelCreditRule>> {
        let rules = sqlx::query_as::<_, ModelCreditRule>(
            "SELECT id, model_pattern, credit_cost FROM model_credit_rules ORDER BY id ASC",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rules)
    }

    /// Quota rules for one level in ascending id order
    #[instrument(skip(self), err)]
    pub async fn list_quota_rules(&mut self, level: Level) -> Result<Vec<QuotaRule>> {
        let rules = sqlx::query_as::<_, QuotaRule>(
            r#"
            SELECT id, level, model_pattern, max_requests, window_seconds
            FROM quota_rules
            WHERE level = $1
            ORDER BY id ASC
            "#,
        )
        .bind(level)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rules)
    }

    pub async fn create_credit_rule(&mut self, model_pattern: &str, credit_cost: i64) -> Result<ModelCreditRule> {
        let rule = sqlx::query_as::<_, ModelCreditRule>(
            r#"
            INSERT INTO model_credit_rules (model_pattern, credit_cost)
            VALUES ($1, $2)
            RETURNING id, model_pattern, credit_cost
            "#,
        )
        .bind(model_pattern)
        .bind(credit_cost)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(rule)
    }

    pub async fn create_quota_rule(
        &mut self,
        level: Level,
        model_pattern: &str,
        max_requests: i64,
        window_seconds: i64,
    ) -> Result<QuotaRule> {
        let rule = sqlx::query_as::<_, QuotaRule>(
            r#"
            INSERT INTO quota_rules (level, model_pattern, max_requests, window_seconds)
            VALUES ($1, $2, $3, $4)
            RETURNING id, level, model_pattern, max_requests, window_seconds
            "#,
        )
        .bind(level)
        .bind(model_pattern)
        .bind(max_requests)
        .bind(window_seconds)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(rule)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test(migrations = "./migrations")]
    async fn test_rules_are_listed_in_id_order_and_scoped_by_level(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Rules::new(&mut conn);

        repo.create_credit_rule("gpt-4", 5).await.unwrap();
        repo.create_credit_rule("", 1).await.unwrap();
        repo.create_quota_rule(1, "gpt-", 10, 60).await.unwrap();
        repo.create_quota_rule(2, "gpt-", 100, 60).await.unwrap();

        let credit = repo.list_credit_rules().await.unwrap();
        assert_eq!(credit.len(), 2);
        assert!(credit[0].id < credit[1].id);
        assert_eq!(credit[0].model_pattern, "gpt-4");

        let quota = repo.list_quota_rules(2).await.unwrap();
        assert_eq!(quota.len(), 1);
        assert_eq!(quota[0].max_requests, 100);
    }
}
