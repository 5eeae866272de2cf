//! Database models for credit transactions.

use crate::types::{RequestId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Why the balance moved. Stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    ModelRequest,
    ManualAdjust,
    ModelRefund,
    CheckIn,
}

/// Lifecycle of a ledger row.
///
/// `Reserved` rows move to exactly one terminal state; terminal rows are never
/// updated again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Reserved,
    Committed,
    Reverted,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Reserved)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Reserved => "reserved",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CreditTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub delta: i64,
    pub reason: CreditReason,
    pub status: TransactionStatus,
    pub model_name: Option<String>,
    pub request_id: Option<RequestId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keyset position in the oldest-first scan of stale reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleCursor {
    pub created_at: DateTime<Utc>,
    pub id: TransactionId,
}

impl From<&CreditTransaction> for StaleCursor {
    fn from(txn: &CreditTransaction) -> Self {
        Self {
            created_at: txn.created_at,
            id: txn.id,
        }
    }
}

/// Result of the conditional balance decrement + ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(TransactionId),
    InsufficientCredits,
}

/// Result of a generic balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOutcome {
    Applied { balance: i64 },
    InsufficientCredits,
    UserNotFound,
}

/// Result of moving a reservation to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call moved the row out of `reserved`
    Applied,
    /// The row was already terminal; nothing changed
    AlreadyFinal(TransactionStatus),
    NotFound,
}

/// One page of a user's ledger, newest first
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub total: i64,
    pub items: Vec<CreditTransaction>,
}
