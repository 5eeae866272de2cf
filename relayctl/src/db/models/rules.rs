//! Database models for prefix-matched pricing and quota rules.

use crate::types::{Level, RuleId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Credit cost for models whose name starts with `model_pattern`.
/// The empty pattern matches every model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ModelCreditRule {
    pub id: RuleId,
    pub model_pattern: String,
    pub credit_cost: i64,
}

/// Fixed-window request ceiling for one user level and model prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuotaRule {
    pub id: RuleId,
    pub level: Level,
    pub model_pattern: String,
    pub max_requests: i64,
    pub window_seconds: i64,
}

impl QuotaRule {
    /// Rules with a non-positive ceiling or window are treated as absent.
    pub fn is_enforceable(&self) -> bool {
        self.max_requests > 0 && self.window_seconds > 0
    }
}
