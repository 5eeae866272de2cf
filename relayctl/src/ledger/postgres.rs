use super::{Finalized, Ledger, LedgerError};
use crate::db::handlers::{Credits, Repository, Users};
use crate::db::models::{
    credits::{AdjustOutcome, CreditReason, CreditTransaction, ReserveOutcome, StaleCursor, TransactionPage},
    users::User,
};
use crate::types::{RequestId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Ledger backed by `users.credits` and `credit_transactions`.
///
/// Each operation checks out its own connection; no transaction is held open across calls.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Ledger for PostgresLedger {
    async fn reserve(&self, user_id: UserId, model: &str, cost: i64, request_id: RequestId) -> Result<TransactionId, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidDelta(cost));
        }
        let mut conn = self.pool.acquire().await?;
        match Credits::new(&mut conn).reserve(user_id, model, cost, request_id).await? {
            ReserveOutcome::Reserved(id) => Ok(id),
            ReserveOutcome::InsufficientCredits => Err(LedgerError::InsufficientCredits),
        }
    }

    async fn commit(&self, transaction_id: TransactionId) -> Result<Finalized, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let outcome = Credits::new(&mut conn).commit(transaction_id).await?;
        Finalized::from_outcome(outcome, transaction_id)
    }

    async fn revert(&self, transaction_id: TransactionId, user_id: UserId, cost: i64) -> Result<Finalized, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let outcome = Credits::new(&mut conn).revert(transaction_id, user_id, cost).await?;
        Finalized::from_outcome(outcome, transaction_id)
    }

    async fn adjust(&self, user_id: UserId, delta: i64, reason: CreditReason) -> Result<i64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidDelta(delta));
        }
        let mut conn = self.pool.acquire().await?;
        match Credits::new(&mut conn).adjust(user_id, delta, reason).await? {
            AdjustOutcome::Applied { balance } => Ok(balance),
            AdjustOutcome::InsufficientCredits => Err(LedgerError::InsufficientCredits),
            AdjustOutcome::UserNotFound => Err(LedgerError::UserNotFound(user_id)),
        }
    }

    async fn account(&self, user_id: UserId) -> Result<Option<User>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Users::new(&mut conn).get_by_id(user_id).await?)
    }

    async fn transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<TransactionPage, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let mut repo = Credits::new(&mut conn);
        let total = repo.count_user_transactions(user_id).await?;
        let items = repo.list_user_transactions(user_id, skip, limit).await?;
        Ok(TransactionPage { total, items })
    }

    async fn stale_reservations(
        &self,
        older_than: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Credits::new(&mut conn).list_stale_reservations(older_than, after, limit).await?)
    }
}
