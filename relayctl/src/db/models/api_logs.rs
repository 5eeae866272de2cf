//! Database models for the relay audit log.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One relayed call. `status_code` is 0 when no upstream response was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiLogEntry {
    pub user_id: UserId,
    pub model: String,
    pub status_code: u16,
    pub success: bool,
    pub error_message: Option<String>,
    /// Caller address, from `X-Forwarded-For` or the peer socket
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiLogEntry {
    pub fn status_label(&self) -> &'static str {
        if self.success { "success" } else { "fail" }
    }
}
