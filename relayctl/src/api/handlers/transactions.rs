//! HTTP handlers for the caller's credit ledger.

use crate::{
    AppState,
    api::models::pagination::{PaginatedResponse, Pagination},
    auth::CurrentUser,
    db::models::credits::CreditTransaction,
    errors::Result,
};
use axum::{
    Json,
    extract::{Query, State},
};

/// `GET /me/credit_transactions?page=&page_size=`
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn list_my_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<CreditTransaction>>> {
    let (skip, limit) = pagination.params();
    let page = state.ledger.transactions(current_user.id, skip, limit).await?;

    Ok(Json(PaginatedResponse {
        total: page.total,
        items: page.items,
    }))
}

#[cfg(test)]
mod tests {
    use crate::db::models::credits::CreditReason;
    use crate::ledger::Ledger;
    use crate::test_utils::TestApp;
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn test_lists_own_transactions_newest_first() {
        let app = TestApp::new();
        let (user, key) = app.create_user("alice", 1, 0);
        let (other, _) = app.create_user("bob", 1, 0);

        for delta in [10, 20, 30] {
            app.ledger.adjust(user.id, delta, CreditReason::ManualAdjust).await.unwrap();
        }
        app.ledger.adjust(other.id, 99, CreditReason::CheckIn).await.unwrap();

        let response = app
            .server
            .get("/me/credit_transactions")
            .add_query_param("page", 1)
            .add_query_param("page_size", 2)
            .authorization_bearer(&key)
            .await;
        response.assert_status(StatusCode::OK);

        let json: Value = response.json();
        assert_eq!(json["total"], 3);
        let items = json["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["delta"], 30);
        assert_eq!(items[1]["delta"], 20);
        assert_eq!(items[0]["reason"], "manual_adjust");
        assert_eq!(items[0]["status"], "committed");

        let response = app
            .server
            .get("/me/credit_transactions")
            .add_query_param("page", 2)
            .add_query_param("page_size", 2)
            .authorization_bearer(&key)
            .await;
        let json: Value = response.json();
        assert_eq!(json["items"].as_array().unwrap().len(), 1);
        assert_eq!(json["items"][0]["delta"], 10);
    }

    #[tokio::test]
    async fn test_invalid_page_size_uses_default() {
        let app = TestApp::new();
        let (user, key) = app.create_user("alice", 1, 0);
        for _ in 0..25 {
            app.ledger.adjust(user.id, 1, CreditReason::CheckIn).await.unwrap();
        }

        let response = app
            .server
            .get("/me/credit_transactions")
            .add_query_param("page", 0)
            .add_query_param("page_size", 500)
            .authorization_bearer(&key)
            .await;
        response.assert_status(StatusCode::OK);

        let json: Value = response.json();
        assert_eq!(json["total"], 25);
        assert_eq!(json["items"].as_array().unwrap().len(), 20);
    }
}
