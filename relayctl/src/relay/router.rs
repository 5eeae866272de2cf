//! Upstream channel selection and path derivation.
//!
//! Channels advertise exact model names, unlike credit and quota rules which match by prefix.
//! There is no load balancing or health-based failover: the first enabled channel (ascending
//! id) listing the model is always chosen.

use crate::catalog::Catalog;
use crate::db::errors::DbError;
use crate::db::models::channels::{Channel, ChannelStatus};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no channel available for model {0}")]
    NoChannelAvailable(String),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// First enabled channel in `channels` whose model list contains `model` exactly.
pub fn pick_channel<'a>(model: &str, channels: &'a [Channel]) -> Option<&'a Channel> {
    channels
        .iter()
        .find(|channel| channel.status == ChannelStatus::Enabled && channel.supports(model))
}

/// Provider path for `model`, chosen by its case-insensitive prefix.
///
/// Gemini models carry the model in the URL and keep the caller's query string.
pub fn upstream_path(model: &str, query: Option<&str>) -> String {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gemini-") {
        let mut path = format!("/v1beta/models/{model}:generateContent");
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            path.push('?');
            path.push_str(query);
        }
        path
    } else if lower.starts_with("claude-") {
        "/v1/messages".to_string()
    } else {
        "/v1/chat/completions".to_string()
    }
}

/// Join a channel base URL and an upstream path.
pub fn upstream_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

pub struct ChannelRouter {
    catalog: Arc<dyn Catalog>,
}

impl ChannelRouter {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub async fn pick(&self, model: &str) -> Result<Channel, RouteError> {
        let channels = self.catalog.enabled_channels().await?;
        pick_channel(model, &channels)
            .cloned()
            .ok_or_else(|| RouteError::NoChannelAvailable(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;

    fn channel(id: i64, models: &[&str], status: ChannelStatus) -> Channel {
        Channel {
            id,
            name: format!("channel-{id}"),
            base_url: format!("https://upstream-{id}.example.com"),
            api_key: String::new(),
            models: models.iter().map(|m| m.to_string()).collect(),
            status,
        }
    }

    #[test]
    fn test_upstream_path_by_model_family() {
        assert_eq!(upstream_path("gemini-1.5-pro", None), "/v1beta/models/gemini-1.5-pro:generateContent");
        assert_eq!(upstream_path("claude-3-opus", None), "/v1/messages");
        assert_eq!(upstream_path("gpt-4o", None), "/v1/chat/completions");
        assert_eq!(upstream_path("Claude-3-Haiku", None), "/v1/messages");
    }

    #[test]
    fn test_gemini_path_keeps_query() {
        assert_eq!(
            upstream_path("gemini-1.5-pro", Some("alt=sse")),
            "/v1beta/models/gemini-1.5-pro:generateContent?alt=sse"
        );
        assert_eq!(upstream_path("gemini-1.5-pro", Some("")), "/v1beta/models/gemini-1.5-pro:generateContent");
        // Only the Gemini shape carries the query string
        assert_eq!(upstream_path("gpt-4o", Some("alt=sse")), "/v1/chat/completions");
    }

    #[test]
    fn test_upstream_url_trims_trailing_slash() {
        assert_eq!(upstream_url("https://api.example.com/", "/v1/messages"), "https://api.example.com/v1/messages");
        assert_eq!(upstream_url("https://api.example.com", "/v1/messages"), "https://api.example.com/v1/messages");
    }

    #[test]
    fn test_picks_only_channel_listing_model() {
        let channels = vec![
            channel(1, &["gpt-4o-mini"], ChannelStatus::Enabled),
            channel(2, &["gpt-4o", "gpt-4o-mini"], ChannelStatus::Enabled),
        ];
        assert_eq!(pick_channel("gpt-4o", &channels).map(|c| c.id), Some(2));
        assert_eq!(pick_channel("gpt-4", &channels).map(|c| c.id), None);
    }

    #[test]
    fn test_first_enabled_match_wins() {
        let channels = vec![
            channel(1, &["gpt-4o"], ChannelStatus::Disabled),
            channel(2, &["gpt-4o"], ChannelStatus::Enabled),
            channel(3, &["gpt-4o"], ChannelStatus::Enabled),
        ];
        assert_eq!(pick_channel("gpt-4o", &channels).map(|c| c.id), Some(2));
    }

    #[tokio::test]
    async fn test_router_reports_no_channel() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.add_channel("openai", "https://a.example.com", "k1", &["gpt-4o"], ChannelStatus::Enabled);
        catalog.add_channel("anthropic", "https://b.example.com", "k2", &["claude-3-opus"], ChannelStatus::Enabled);
        let router = ChannelRouter::new(catalog);

        let picked = router.pick("claude-3-opus").await.unwrap();
        assert_eq!(picked.name, "anthropic");

        match router.pick("gemini-1.5-pro").await {
            Err(RouteError::NoChannelAvailable(model)) => assert_eq!(model, "gemini-1.5-pro"),
            other => panic!("expected NoChannelAvailable, got {other:?}"),
        }
    }
}
