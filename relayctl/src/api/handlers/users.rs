//! HTTP handlers for the caller's account.

use crate::{
    AppState,
    api::models::users::AccountResponse,
    auth::CurrentUser,
    errors::{Error, Result},
};
use axum::{Json, extract::State};

/// `GET /me`
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn get_me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<AccountResponse>> {
    let user = state.ledger.account(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;

    Ok(Json(AccountResponse::from(user)))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestApp;
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn test_get_me_returns_balance_and_level() {
        let app = TestApp::new();
        let (user, key) = app.create_user("alice", 2, 150);

        let response = app.server.get("/me").authorization_bearer(&key).await;
        response.assert_status(StatusCode::OK);

        let json: Value = response.json();
        assert_eq!(json["id"], user.id);
        assert_eq!(json["username"], "alice");
        assert_eq!(json["role"], "user");
        assert_eq!(json["level"], 2);
        assert_eq!(json["status"], "normal");
        assert_eq!(json["credits"], 150);
        assert!(json.get("api_key_hash").is_none());
    }
}
