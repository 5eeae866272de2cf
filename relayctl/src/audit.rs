//! Best-effort audit log of relayed calls.
//!
//! One [`ApiLogEntry`] is written per finalized request. Writes happen on a spawned task and
//! failures are only logged: the audit trail must never delay or fail a response.

use crate::db::errors::DbError;
use crate::db::handlers::ApiLogs;
use crate::db::models::api_logs::ApiLogEntry;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: ApiLogEntry) -> Result<(), DbError>;
}

/// Record `entry` in the background.
pub fn spawn_record(sink: Arc<dyn AuditSink>, entry: ApiLogEntry) {
    tokio::spawn(async move {
        let user_id = entry.user_id;
        if let Err(e) = sink.record(entry).await {
            warn!(user_id, error = %e, "Failed to write audit log entry");
        }
    });
}

/// Writes to the `api_logs` table.
#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, entry: ApiLogEntry) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        ApiLogs::new(&mut conn).insert(&entry).await
    }
}

#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<ApiLogEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ApiLogEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: ApiLogEntry) -> Result<(), DbError> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    struct BrokenSink;

    #[async_trait::async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _entry: ApiLogEntry) -> Result<(), DbError> {
            Err(DbError::Other(anyhow::anyhow!("audit table unavailable")))
        }
    }

    fn entry(success: bool) -> ApiLogEntry {
        ApiLogEntry {
            user_id: 1,
            model: "gpt-4o".to_string(),
            status_code: if success { 200 } else { 500 },
            success,
            error_message: None,
            ip_address: Some("203.0.113.7".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_spawned_record_lands_in_sink() {
        let sink = Arc::new(InMemoryAuditSink::new());
        spawn_record(sink.clone(), entry(true));
        spawn_record(sink.clone(), entry(false));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e.status_label() == "fail").count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_sink_failure_is_swallowed() {
        spawn_record(Arc::new(BrokenSink), entry(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
