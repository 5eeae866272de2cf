use crate::{AppState, auth::CurrentUser, errors::Error};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, trace};

/// Resolve the caller and attach a [`CurrentUser`] to the request, or reject with 401/403.
pub async fn require_user(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match state.identity.resolve(request.headers()).await {
        Ok(Some(user)) => {
            trace!(user_id = user.id, level = user.level, "Authenticated request");
            request.extensions_mut().insert::<CurrentUser>(user);
            next.run(request).await
        }
        Ok(None) => {
            debug!(path = %request.uri().path(), "Rejecting request without credentials");
            Error::Unauthenticated { message: None }.into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::api_key::hash_api_key;
    use crate::db::models::users::UserStatus;
    use crate::test_utils::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_missing_credentials_is_401() {
        let app = TestApp::new();
        let response = app.server.get("/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_invalid_key_is_401() {
        let app = TestApp::new();
        let response = app.server.get("/me").authorization_bearer("sk-nobody").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_disabled_user_is_403() {
        let app = TestApp::new();
        let user = app.ledger.insert_user("eve", 1, 100, Some(hash_api_key("sk-eve")));
        app.ledger.set_status(user.id, UserStatus::Disabled);

        let response = app
            .server
            .post("/v1/chat/completions")
            .authorization_bearer("sk-eve")
            .json(&serde_json::json!({"model": "gpt-4o"}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(app.ledger.balance(user.id), Some(100));
    }

    #[tokio::test]
    async fn test_health_check_needs_no_credentials() {
        let app = TestApp::new();
        let response = app.server.get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
    }
}
