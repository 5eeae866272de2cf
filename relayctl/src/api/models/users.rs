use crate::db::models::users::{Role, User, UserStatus};
use crate::types::{Level, UserId};
use serde::Serialize;

/// The caller's own account, as returned by `GET /me`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub level: Level,
    pub status: UserStatus,
    pub credits: i64,
}

impl From<User> for AccountResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            level: user.level,
            status: user.status,
            credits: user.credits,
        }
    }
}
