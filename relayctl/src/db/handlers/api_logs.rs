//! Database repository for the relay audit log.

use crate::db::{errors::Result, models::api_logs::ApiLogEntry};
use sqlx::PgConnection;

pub struct ApiLogs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiLogs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn insert(&mut self, entry: &ApiLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_logs (user_id, model, status, status_code, error_message, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.model)
        .bind(entry.status_label())
        .bind(i32::from(entry.status_code))
        .bind(&entry.error_message)
        .bind(&entry.ip_address)
        .bind(entry.created_at)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }
}
