use crate::db::{
    errors::{DbError, Result},
    models::credits::{
        AdjustOutcome, CreditReason, CreditTransaction, FinalizeOutcome, ReserveOutcome, StaleCursor, TransactionStatus,
    },
};
use crate::types::{RequestId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;

/// Repository for the credit ledger.
///
/// Every balance change is a single conditional `UPDATE` on `users.credits`, executed in the
/// same database transaction as the ledger row it produces. Balances are never read and then
/// written back.
pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Deduct `cost` and record a `reserved` row, or do nothing if the balance is too low.
    #[instrument(skip(self), err)]
    pub async fn reserve(&mut self, user_id: UserId, model: &str, cost: i64, request_id: RequestId) -> Result<ReserveOutcome> {
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET credits = credits - $1, updated_at = NOW()
            WHERE id = $2 AND credits >= $1
            "#,
        )
        .bind(cost)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls it back; no ledger row is written
            return Ok(ReserveOutcome::InsufficientCredits);
        }

        let id: TransactionId = sqlx::query_scalar(
            r#"
            INSERT INTO credit_transactions (user_id, delta, reason, status, model_name, request_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(-cost)
        .bind(CreditReason::ModelRequest)
        .bind(TransactionStatus::Reserved)
        .bind(model)
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReserveOutcome::Reserved(id))
    }

    /// Mark a reserved row committed. The balance was already charged at reservation time.
    #[instrument(skip(self), err)]
    pub async fn commit(&mut self, transaction_id: TransactionId) -> Result<FinalizeOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE credit_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionStatus::Committed)
        .bind(TransactionStatus::Reserved)
        .execute(&mut *self.db)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(FinalizeOutcome::Applied);
        }

        let status: Option<TransactionStatus> = sqlx::query_scalar("SELECT status FROM credit_transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(match status {
            Some(status) => FinalizeOutcome::AlreadyFinal(status),
            None => FinalizeOutcome::NotFound,
        })
    }

    /// Refund a reserved row: credit the balance back, mark the row `reverted` and append a
    /// committed `model_refund` row.
    ///
    /// Only the transaction row is locked, so reverts of different requests for the same user
    /// run concurrently.
    #[instrument(skip(self), err)]
    pub async fn revert(&mut self, transaction_id: TransactionId, user_id: UserId, cost: i64) -> Result<FinalizeOutcome> {
        let mut tx = self.db.begin().await?;

        let row: Option<(TransactionStatus, Option<String>)> = sqlx::query_as(
            r#"
            SELECT status, model_name
            FROM credit_transactions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, model_name)) = row else {
            return Ok(FinalizeOutcome::NotFound);
        };
        if status != TransactionStatus::Reserved {
            return Ok(FinalizeOutcome::AlreadyFinal(status));
        }

        let refunded = sqlx::query("UPDATE users SET credits = credits + $1, updated_at = NOW() WHERE id = $2")
            .bind(cost)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if refunded.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query("UPDATE credit_transactions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(transaction_id)
            .bind(TransactionStatus::Reverted)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (user_id, delta, reason, status, model_name)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .bind(CreditReason::ModelRefund)
        .bind(TransactionStatus::Committed)
        .bind(model_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FinalizeOutcome::Applied)
    }

    /// Apply a signed, non-zero `delta` and record a committed row.
    #[instrument(skip(self), err)]
    pub async fn adjust(&mut self, user_id: UserId, delta: i64, reason: CreditReason) -> Result<AdjustOutcome> {
        let mut tx = self.db.begin().await?;

        // credits + delta >= 0 is the sufficiency check for debits and always holds for credits
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits + $1, updated_at = NOW()
            WHERE id = $2 AND credits + $1 >= 0
            RETURNING credits
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(match exists {
                Some(_) => AdjustOutcome::InsufficientCredits,
                None => AdjustOutcome::UserNotFound,
            });
        };

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (user_id, delta, reason, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(reason)
        .bind(TransactionStatus::Committed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AdjustOutcome::Applied { balance })
    }

    /// List transactions for a specific user with pagination, newest first
    pub async fn list_user_transactions(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<CreditTransaction>> {
        let transactions = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, delta, reason, status, model_name, request_id, created_at, updated_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(transactions)
    }

    pub async fn count_user_transactions(&mut self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Reserved rows created before `older_than` and strictly after `after`, oldest first
    pub async fn list_stale_reservations(
        &mut self,
        older_than: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>> {
        let transactions = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, delta, reason, status, model_name, request_id, created_at, updated_at
            FROM credit_transactions
            WHERE status = $1
              AND created_at < $2
              AND ($3::timestamptz IS NULL OR (created_at, id) > ($3::timestamptz, $4::bigint))
            ORDER BY created_at ASC, id ASC
            LIMIT $5
            "#,
        )
        .bind(TransactionStatus::Reserved)
        .bind(older_than)
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.id))
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(transactions)
    }
}
