//! Model name extraction, one narrow parse step per provider shape.

use serde::Deserialize;

/// Inbound relay surface a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRoute {
    /// `POST /v1/chat/completions`, model in the JSON body
    ChatCompletions,
    /// `POST /v1/messages`, model in the JSON body
    Messages,
    /// `POST /v1beta/models/{model}:{action}`, model in the URL
    GenerateContent,
}

impl RelayRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayRoute::ChatCompletions => "chat_completions",
            RelayRoute::Messages => "messages",
            RelayRoute::GenerateContent => "generate_content",
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid request body")]
    InvalidBody,
    #[error("model is required")]
    Missing,
}

#[derive(Deserialize)]
struct ModelField {
    #[serde(default)]
    model: Option<String>,
}

/// `model` field of an OpenAI or Anthropic style JSON body.
pub fn model_from_body(body: &[u8]) -> Result<Option<String>, ModelError> {
    let parsed: ModelField = serde_json::from_slice(body).map_err(|_| ModelError::InvalidBody)?;
    Ok(parsed.model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()))
}

/// Model segment of a Gemini style path such as `gemini-1.5-pro:streamGenerateContent`.
///
/// The last path segment is used and anything from the first `:` on is the action.
pub fn model_from_path(path: &str) -> Option<String> {
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let model = segment.split(':').next()?.trim();
    (!model.is_empty()).then(|| model.to_string())
}

/// Resolve the target model for a request on `route`.
pub fn extract_model(route: RelayRoute, path: &str, body: &[u8]) -> Result<String, ModelError> {
    let model = match route {
        RelayRoute::ChatCompletions | RelayRoute::Messages => model_from_body(body)?,
        RelayRoute::GenerateContent => model_from_path(path),
    };
    model.ok_or(ModelError::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_model() {
        let body = br#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
        assert_eq!(extract_model(RelayRoute::ChatCompletions, "/v1/chat/completions", body).unwrap(), "gpt-4o");

        let body = br#"{"model":"claude-3-opus","max_tokens":16,"messages":[]}"#;
        assert_eq!(extract_model(RelayRoute::Messages, "/v1/messages", body).unwrap(), "claude-3-opus");
    }

    #[test]
    fn test_body_without_model_is_missing() {
        assert_eq!(extract_model(RelayRoute::ChatCompletions, "", br#"{"messages":[]}"#), Err(ModelError::Missing));
        assert_eq!(extract_model(RelayRoute::ChatCompletions, "", br#"{"model":"  "}"#), Err(ModelError::Missing));
    }

    #[test]
    fn test_invalid_json_body() {
        assert_eq!(extract_model(RelayRoute::Messages, "", b"not json"), Err(ModelError::InvalidBody));
        assert_eq!(extract_model(RelayRoute::Messages, "", b""), Err(ModelError::InvalidBody));
        assert_eq!(extract_model(RelayRoute::Messages, "", br#"{"model": 4}"#), Err(ModelError::InvalidBody));
    }

    #[test]
    fn test_gemini_path_model() {
        assert_eq!(
            model_from_path("/v1beta/models/gemini-1.5-pro:streamGenerateContent").as_deref(),
            Some("gemini-1.5-pro")
        );
        assert_eq!(model_from_path("gemini-2.0-flash:generateContent").as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(model_from_path("gemini-2.0-flash").as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(model_from_path("/v1beta/models/:generateContent"), None);
        assert_eq!(model_from_path(""), None);
    }

    #[test]
    fn test_gemini_route_ignores_body() {
        let model = extract_model(RelayRoute::GenerateContent, "/v1beta/models/gemini-1.5-pro:generateContent", b"{}").unwrap();
        assert_eq!(model, "gemini-1.5-pro");
    }
}
