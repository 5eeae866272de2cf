use super::{Finalized, Ledger, LedgerError};
use crate::db::errors::DbError;
use crate::db::models::{
    credits::{CreditReason, CreditTransaction, StaleCursor, TransactionPage, TransactionStatus},
    users::{Role, User, UserStatus},
};
use crate::types::{Level, RequestId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Ledger held in process memory.
///
/// A single mutex serialises every operation, which gives the same atomicity as the
/// conditional updates of [`super::PostgresLedger`]. Used by tests and single-node
/// development setups.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    transactions: Vec<CreditTransaction>,
}

impl State {
    fn push(
        &mut self,
        user_id: UserId,
        delta: i64,
        reason: CreditReason,
        status: TransactionStatus,
        model_name: Option<String>,
        request_id: Option<RequestId>,
    ) -> TransactionId {
        let now = Utc::now();
        let id = self.transactions.len() as TransactionId + 1;
        self.transactions.push(CreditTransaction {
            id,
            user_id,
            delta,
            reason,
            status,
            model_name,
            request_id,
            created_at: now,
            updated_at: now,
        });
        id
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Option<&mut CreditTransaction> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.transactions.get_mut(index)
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account and return it.
    pub fn insert_user(&self, username: &str, level: Level, credits: i64, api_key_hash: Option<String>) -> User {
        let mut state = self.state.lock();
        let now = Utc::now();
        let user = User {
            id: state.users.len() as UserId + 1,
            username: username.to_string(),
            role: Role::User,
            level,
            status: UserStatus::Normal,
            credits,
            api_key_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub fn set_status(&self, user_id: UserId, status: UserStatus) {
        if let Some(user) = self.state.lock().users.get_mut(&user_id) {
            user.status = status;
        }
    }

    pub fn find_by_api_key_hash(&self, hash: &str) -> Option<User> {
        self.state
            .lock()
            .users
            .values()
            .find(|u| u.api_key_hash.as_deref() == Some(hash))
            .cloned()
    }

    pub fn balance(&self, user_id: UserId) -> Option<i64> {
        self.state.lock().users.get(&user_id).map(|u| u.credits)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<CreditTransaction> {
        self.state.lock().transaction_mut(id).map(|t| t.clone())
    }

    /// All rows for a user in insertion order
    pub fn user_transactions(&self, user_id: UserId) -> Vec<CreditTransaction> {
        self.state
            .lock()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Backdate a row, for exercising the reservation sweep
    pub fn set_created_at(&self, id: TransactionId, created_at: DateTime<Utc>) {
        if let Some(txn) = self.state.lock().transaction_mut(id) {
            txn.created_at = created_at;
        }
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn reserve(&self, user_id: UserId, model: &str, cost: i64, request_id: RequestId) -> Result<TransactionId, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidDelta(cost));
        }
        let mut state = self.state.lock();

        if state.transactions.iter().any(|t| t.request_id == Some(request_id)) {
            return Err(LedgerError::Database(DbError::UniqueViolation {
                constraint: Some("credit_transactions_request_id_key".to_string()),
                table: Some("credit_transactions".to_string()),
                message: format!("duplicate request id {request_id}"),
            }));
        }

        let Some(user) = state.users.get_mut(&user_id) else {
            return Err(LedgerError::InsufficientCredits);
        };
        if user.credits < cost {
            return Err(LedgerError::InsufficientCredits);
        }
        user.credits -= cost;
        user.updated_at = Utc::now();

        Ok(state.push(
            user_id,
            -cost,
            CreditReason::ModelRequest,
            TransactionStatus::Reserved,
            Some(model.to_string()),
            Some(request_id),
        ))
    }

    async fn commit(&self, transaction_id: TransactionId) -> Result<Finalized, LedgerError> {
        let mut state = self.state.lock();
        let txn = state
            .transaction_mut(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if txn.status.is_terminal() {
            return Ok(Finalized::AlreadyFinal);
        }
        txn.status = TransactionStatus::Committed;
        txn.updated_at = Utc::now();
        Ok(Finalized::Applied)
    }

    async fn revert(&self, transaction_id: TransactionId, user_id: UserId, cost: i64) -> Result<Finalized, LedgerError> {
        let mut state = self.state.lock();
        let txn = state
            .transaction_mut(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if txn.status.is_terminal() {
            return Ok(Finalized::AlreadyFinal);
        }
        let model_name = txn.model_name.clone();

        let user = state.users.get_mut(&user_id).ok_or(LedgerError::UserNotFound(user_id))?;
        user.credits += cost;
        user.updated_at = Utc::now();

        if let Some(txn) = state.transaction_mut(transaction_id) {
            txn.status = TransactionStatus::Reverted;
            txn.updated_at = Utc::now();
        }
        state.push(
            user_id,
            cost,
            CreditReason::ModelRefund,
            TransactionStatus::Committed,
            model_name,
            None,
        );
        Ok(Finalized::Applied)
    }

    async fn adjust(&self, user_id: UserId, delta: i64, reason: CreditReason) -> Result<i64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidDelta(delta));
        }
        let mut state = self.state.lock();
        let user = state.users.get_mut(&user_id).ok_or(LedgerError::UserNotFound(user_id))?;
        if user.credits + delta < 0 {
            return Err(LedgerError::InsufficientCredits);
        }
        user.credits += delta;
        user.updated_at = Utc::now();
        let balance = user.credits;

        state.push(user_id, delta, reason, TransactionStatus::Committed, None, None);
        Ok(balance)
    }

    async fn account(&self, user_id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.state.lock().users.get(&user_id).cloned())
    }

    async fn transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<TransactionPage, LedgerError> {
        let state = self.state.lock();
        let mut rows: Vec<&CreditTransaction> = state.transactions.iter().filter(|t| t.user_id == user_id).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(TransactionPage {
            total: rows.len() as i64,
            items: rows
                .into_iter()
                .skip(skip.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect(),
        })
    }

    async fn stale_reservations(
        &self,
        older_than: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let state = self.state.lock();
        let mut rows: Vec<CreditTransaction> = state
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Reserved && t.created_at < older_than)
            .filter(|t| after.is_none_or(|c| (t.created_at, t.id) > (c.created_at, c.id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_second_reservation_fails_when_balance_exhausted() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("alice", 1, 10, None);

        let id = ledger.reserve(user.id, "gpt-4o", 10, Uuid::new_v4()).await.unwrap();
        assert_eq!(ledger.balance(user.id), Some(0));
        assert_eq!(ledger.transaction(id).unwrap().status, TransactionStatus::Reserved);

        let err = ledger.reserve(user.id, "gpt-4o", 10, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits));
        // No row for the failed attempt
        assert_eq!(ledger.user_transactions(user.id).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_exceed_balance() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user_id = ledger.insert_user("racer", 1, 23, None).id;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(user_id, "gpt-4o", 5, Uuid::new_v4()).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::InsufficientCredits) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 4);
        assert_eq!(ledger.balance(user_id), Some(3));
    }

    #[tokio::test]
    async fn test_first_finalization_wins() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("bob", 1, 50, None);

        let committed = ledger.reserve(user.id, "gpt-4o", 5, Uuid::new_v4()).await.unwrap();
        assert_eq!(ledger.commit(committed).await.unwrap(), Finalized::Applied);
        assert_eq!(ledger.commit(committed).await.unwrap(), Finalized::AlreadyFinal);
        assert_eq!(ledger.revert(committed, user.id, 5).await.unwrap(), Finalized::AlreadyFinal);
        assert_eq!(ledger.transaction(committed).unwrap().status, TransactionStatus::Committed);
        assert_eq!(ledger.balance(user.id), Some(45));

        let reverted = ledger.reserve(user.id, "gpt-4o", 5, Uuid::new_v4()).await.unwrap();
        assert_eq!(ledger.revert(reverted, user.id, 5).await.unwrap(), Finalized::Applied);
        assert_eq!(ledger.revert(reverted, user.id, 5).await.unwrap(), Finalized::AlreadyFinal);
        assert_eq!(ledger.commit(reverted).await.unwrap(), Finalized::AlreadyFinal);
        assert_eq!(ledger.transaction(reverted).unwrap().status, TransactionStatus::Reverted);
        assert_eq!(ledger.balance(user.id), Some(45));

        let refunds: Vec<_> = ledger
            .user_transactions(user.id)
            .into_iter()
            .filter(|t| t.reason == CreditReason::ModelRefund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].delta, 5);
        assert_eq!(refunds[0].status, TransactionStatus::Committed);
        assert_eq!(refunds[0].model_name.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commit_and_revert_apply_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user_id = ledger.insert_user("racer", 1, 100, None).id;

        for _ in 0..50 {
            let id = ledger.reserve(user_id, "gpt-4o", 5, Uuid::new_v4()).await.unwrap();
            let before = ledger.user_transactions(user_id).len();

            let (commit, revert) = tokio::join!(
                tokio::spawn({
                    let ledger = ledger.clone();
                    async move { ledger.commit(id).await }
                }),
                tokio::spawn({
                    let ledger = ledger.clone();
                    async move { ledger.revert(id, user_id, 5).await }
                }),
            );
            let commit = commit.unwrap().unwrap();
            let revert = revert.unwrap().unwrap();

            match (commit, revert) {
                (Finalized::Applied, Finalized::AlreadyFinal) => {
                    assert_eq!(ledger.transaction(id).unwrap().status, TransactionStatus::Committed);
                    assert_eq!(ledger.balance(user_id), Some(95));
                    assert_eq!(ledger.user_transactions(user_id).len(), before);
                    // Put the charge back so every round starts from 100
                    ledger.adjust(user_id, 5, CreditReason::ManualAdjust).await.unwrap();
                }
                (Finalized::AlreadyFinal, Finalized::Applied) => {
                    assert_eq!(ledger.transaction(id).unwrap().status, TransactionStatus::Reverted);
                    assert_eq!(ledger.balance(user_id), Some(100));
                    assert_eq!(ledger.user_transactions(user_id).len(), before + 1);
                }
                other => panic!("exactly one finalization must apply, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stale_reservations_resume_after_cursor() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("sweep", 1, 100, None);
        let old = Utc::now() - chrono::Duration::hours(2);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = ledger.reserve(user.id, "gpt-4o", 1, Uuid::new_v4()).await.unwrap();
            // Identical timestamps are ordered by id
            ledger.set_created_at(id, old);
            ids.push(id);
        }

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let first = ledger.stale_reservations(cutoff, None, 2).await.unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), ids[..2]);

        let rest = ledger
            .stale_reservations(cutoff, Some(StaleCursor::from(&first[1])), 2)
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|t| t.id).collect::<Vec<_>>(), ids[2..]);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_an_error() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(ledger.commit(99).await, Err(LedgerError::TransactionNotFound(99))));
        assert!(matches!(ledger.revert(0, 1, 1).await, Err(LedgerError::TransactionNotFound(0))));
    }

    #[tokio::test]
    async fn test_duplicate_request_id_rejected() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("carol", 1, 50, None);
        let request_id = Uuid::new_v4();

        ledger.reserve(user.id, "gpt-4o", 5, request_id).await.unwrap();
        let err = ledger.reserve(user.id, "gpt-4o", 5, request_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Database(DbError::UniqueViolation { .. })));
        assert_eq!(ledger.balance(user.id), Some(45));
    }

    #[tokio::test]
    async fn test_adjust() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("dave", 1, 5, None);

        assert_eq!(ledger.adjust(user.id, 10, CreditReason::CheckIn).await.unwrap(), 15);
        assert_eq!(ledger.adjust(user.id, -15, CreditReason::ManualAdjust).await.unwrap(), 0);
        assert!(matches!(
            ledger.adjust(user.id, -1, CreditReason::ManualAdjust).await,
            Err(LedgerError::InsufficientCredits)
        ));
        assert!(matches!(
            ledger.adjust(user.id, 0, CreditReason::ManualAdjust).await,
            Err(LedgerError::InvalidDelta(0))
        ));
        assert!(matches!(
            ledger.adjust(404, 1, CreditReason::ManualAdjust).await,
            Err(LedgerError::UserNotFound(404))
        ));

        let rows = ledger.user_transactions(user.id);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|t| t.status == TransactionStatus::Committed));
    }

    #[tokio::test]
    async fn test_transactions_are_paged_newest_first() {
        let ledger = InMemoryLedger::new();
        let user = ledger.insert_user("erin", 1, 0, None);
        for delta in 1..=5 {
            ledger.adjust(user.id, delta, CreditReason::ManualAdjust).await.unwrap();
        }

        let page = ledger.transactions(user.id, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        let deltas: Vec<i64> = page.items.iter().map(|t| t.delta).collect();
        assert_eq!(deltas, vec![4, 3]);
    }
}
