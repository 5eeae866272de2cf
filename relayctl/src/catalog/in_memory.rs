use super::Catalog;
use crate::db::errors::DbError;
use crate::db::models::{
    channels::{Channel, ChannelStatus},
    rules::{ModelCreditRule, QuotaRule},
};
use crate::types::Level;
use parking_lot::RwLock;

/// In-process catalog for tests and single-node development.
///
/// Ids are assigned on insertion, so insertion order is id order.
#[derive(Default)]
pub struct InMemoryCatalog {
    credit_rules: RwLock<Vec<ModelCreditRule>>,
    quota_rules: RwLock<Vec<QuotaRule>>,
    channels: RwLock<Vec<Channel>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_credit_rule(&self, model_pattern: &str, credit_cost: i64) -> ModelCreditRule {
        let mut rules = self.credit_rules.write();
        let rule = ModelCreditRule {
            id: rules.len() as i64 + 1,
            model_pattern: model_pattern.to_string(),
            credit_cost,
        };
        rules.push(rule.clone());
        rule
    }

    pub fn add_quota_rule(&self, level: Level, model_pattern: &str, max_requests: i64, window_seconds: i64) -> QuotaRule {
        let mut rules = self.quota_rules.write();
        let rule = QuotaRule {
            id: rules.len() as i64 + 1,
            level,
            model_pattern: model_pattern.to_string(),
            max_requests,
            window_seconds,
        };
        rules.push(rule.clone());
        rule
    }

    pub fn add_channel(&self, name: &str, base_url: &str, api_key: &str, models: &[&str], status: ChannelStatus) -> Channel {
        let mut channels = self.channels.write();
        let channel = Channel {
            id: channels.len() as i64 + 1,
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            status,
        };
        channels.push(channel.clone());
        channel
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn credit_rules(&self) -> Result<Vec<ModelCreditRule>, DbError> {
        Ok(self.credit_rules.read().clone())
    }

    async fn quota_rules(&self, level: Level) -> Result<Vec<QuotaRule>, DbError> {
        Ok(self.quota_rules.read().iter().filter(|r| r.level == level).cloned().collect())
    }

    async fn enabled_channels(&self) -> Result<Vec<Channel>, DbError> {
        Ok(self
            .channels
            .read()
            .iter()
            .filter(|c| c.status == ChannelStatus::Enabled)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_rules_are_scoped_by_level() {
        let catalog = InMemoryCatalog::new();
        catalog.add_quota_rule(1, "gpt-", 10, 60);
        catalog.add_quota_rule(2, "gpt-", 100, 60);

        let rules = catalog.quota_rules(2).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].max_requests, 100);
        assert!(catalog.quota_rules(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channels_are_hidden() {
        let catalog = InMemoryCatalog::new();
        catalog.add_channel("a", "http://a", "k", &["gpt-4o"], ChannelStatus::Disabled);
        catalog.add_channel("b", "http://b", "k", &["gpt-4o"], ChannelStatus::Enabled);

        let channels = catalog.enabled_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "b");
    }
}
