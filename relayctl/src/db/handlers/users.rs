//! Database repository for users.

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::users::{User, UserCreateDBRequest},
};
use crate::types::UserId;
use sqlx::PgConnection;
use tracing::instrument;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Look up the account owning an API key by the key's SHA-256 hex digest
    #[instrument(skip(self, hash), err)]
    pub async fn get_by_api_key_hash(&mut self, hash: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, role, level, status, credits, api_key_hash, created_at, updated_at
            FROM users
            WHERE api_key_hash = $1
            "#,
        )
        .bind(hash)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type Response = User;
    type Id = UserId;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, role, level, credits, api_key_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, role, level, status, credits, api_key_hash, created_at, updated_at
            "#,
        )
        .bind(&request.username)
        .bind(request.role)
        .bind(request.level)
        .bind(request.credits)
        .bind(&request.api_key_hash)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, role, level, status, credits, api_key_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }
}
