//! Database models for upstream channels.

use crate::types::ChannelId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    Disabled,
}

/// An upstream provider endpoint. `models` lists exact model names.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[sqlx(json)]
    pub models: Vec<String>,
    pub status: ChannelStatus,
}

impl Channel {
    pub fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}
