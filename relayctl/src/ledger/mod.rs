//! Prepaid credit ledger.
//!
//! A relay request is charged in two steps. [`Ledger::reserve`] deducts the cost and records a
//! `reserved` row before the upstream call; after the call the row is either committed
//! (charge stands) or reverted (charge refunded through a separate `model_refund` row).
//! Because the intermediate state is persisted, a crash between the two steps leaves an
//! inspectable row that [`sweeper::ReservationSweeper`] later refunds.
//!
//! Insufficient funds is an expected outcome and is reported as
//! [`LedgerError::InsufficientCredits`]; every other error is a system failure the caller
//! must not swallow.

use crate::db::errors::DbError;
use crate::db::models::{
    credits::{CreditReason, CreditTransaction, FinalizeOutcome, StaleCursor, TransactionPage},
    users::User,
};
use crate::types::{RequestId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod in_memory;
pub mod postgres;
pub mod sweeper;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use sweeper::ReservationSweeper;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credits")]
    InsufficientCredits,

    /// Zero adjustments and non-positive reservations
    #[error("credit amount must be non-zero (got {0})")]
    InvalidDelta(i64),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("credit transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(DbError::from(err))
    }
}

/// Terminal state reached by a finalization call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// This call performed the transition
    Applied,
    /// An earlier call already finalized the row; nothing changed
    AlreadyFinal,
}

impl Finalized {
    fn from_outcome(outcome: FinalizeOutcome, transaction_id: TransactionId) -> Result<Self, LedgerError> {
        match outcome {
            FinalizeOutcome::Applied => Ok(Finalized::Applied),
            FinalizeOutcome::AlreadyFinal(_) => Ok(Finalized::AlreadyFinal),
            FinalizeOutcome::NotFound => Err(LedgerError::TransactionNotFound(transaction_id)),
        }
    }
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    /// Deduct `cost` from the balance and record a `reserved` row, atomically.
    ///
    /// Concurrent reservations never overdraw: at most `floor(balance / cost)` succeed.
    async fn reserve(&self, user_id: UserId, model: &str, cost: i64, request_id: RequestId) -> Result<TransactionId, LedgerError>;

    /// Mark a reservation committed. No-op on an already-final row.
    async fn commit(&self, transaction_id: TransactionId) -> Result<Finalized, LedgerError>;

    /// Refund a reservation. No-op on an already-final row, so a refund can never be paid
    /// twice or race a commit.
    async fn revert(&self, transaction_id: TransactionId, user_id: UserId, cost: i64) -> Result<Finalized, LedgerError>;

    /// Apply a signed, non-zero balance change and return the new balance.
    async fn adjust(&self, user_id: UserId, delta: i64, reason: CreditReason) -> Result<i64, LedgerError>;

    async fn account(&self, user_id: UserId) -> Result<Option<User>, LedgerError>;

    /// A user's ledger rows, newest first
    async fn transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<TransactionPage, LedgerError>;

    /// Reserved rows created before `older_than`, oldest first, resuming after `after`
    async fn stale_reservations(
        &self,
        older_than: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError>;
}
