use crate::db::errors::DbError;
use crate::ledger::LedgerError;
use crate::quota::QuotaDenial;
use crate::relay::proxy::TransportError;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated but not allowed to use the gateway
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data, e.g. no model could be determined
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The caller's fixed-window quota for this model is used up
    #[error("Quota exceeded for model pattern '{}'", .0.model_pattern)]
    QuotaExceeded(QuotaDenial),

    /// Balance is below the model's credit cost
    #[error("Insufficient credits")]
    InsufficientCredits,

    /// No enabled channel lists the model
    #[error("No channel available for model {model}")]
    NoChannelAvailable { model: String },

    /// Upstream could not be reached
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits => Error::InsufficientCredits,
            LedgerError::InvalidDelta(delta) => Error::BadRequest {
                message: format!("Invalid credit amount {delta}"),
            },
            LedgerError::UserNotFound(id) => Error::NotFound {
                resource: "User".to_string(),
                id: id.to_string(),
            },
            LedgerError::TransactionNotFound(id) => Error::NotFound {
                resource: "Credit transaction".to_string(),
                id: id.to_string(),
            },
            LedgerError::Database(e) => Error::Database(e),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            Error::NoChannelAvailable { .. } => StatusCode::BAD_GATEWAY,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code returned in the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::Forbidden { .. } => "forbidden",
            Error::BadRequest { .. } => "invalid_request",
            Error::NotFound { .. } => "not_found",
            Error::QuotaExceeded(_) => "quota_exceeded",
            Error::InsufficientCredits => "credit_insufficient",
            Error::NoChannelAvailable { .. } => "no_channel",
            Error::Transport(_) => "upstream_unreachable",
            Error::Database(DbError::NotFound) => "not_found",
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::QuotaExceeded(denial) => format!(
                "Request quota exceeded: at most {} requests per {}s for models matching '{}'",
                denial.max_requests, denial.window_seconds, denial.model_pattern
            ),
            Error::InsufficientCredits => "Insufficient credits for this model".to_string(),
            Error::NoChannelAvailable { model } => format!("No upstream channel available for model {model}"),
            Error::Transport(_) => "Upstream provider could not be reached".to_string(),
            Error::Database(DbError::NotFound) => "Resource not found".to_string(),
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::NotFound) => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Database(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Transport(_) | Error::NoChannelAvailable { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::QuotaExceeded(_) | Error::InsufficientCredits => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut body = json!({
            "error": self.code(),
            "message": self.user_message(),
        });

        let retry_after = match &self {
            Error::QuotaExceeded(denial) => {
                let retry_after_seconds = denial.retry_after.as_secs().max(1);
                body["limit"] = json!({
                    "model_pattern": denial.model_pattern,
                    "max_requests": denial.max_requests,
                    "window_seconds": denial.window_seconds,
                    "retry_after_seconds": retry_after_seconds,
                });
                Some(retry_after_seconds)
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_quota_exceeded_response() {
        let response = Error::QuotaExceeded(QuotaDenial {
            model_pattern: "gpt-".to_string(),
            max_requests: 10,
            window_seconds: 60,
            count: 11,
            retry_after: Duration::from_secs(42),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let body = body_json(response).await;
        assert_eq!(body["error"], "quota_exceeded");
        assert_eq!(body["limit"]["model_pattern"], "gpt-");
        assert_eq!(body["limit"]["max_requests"], 10);
        assert_eq!(body["limit"]["retry_after_seconds"], 42);
    }

    #[tokio::test]
    async fn test_internal_details_are_not_leaked() {
        let response = Error::Database(DbError::Other(anyhow::anyhow!("connection to 10.0.0.5 refused"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "internal_error");
        assert_eq!(body["message"], "Internal server error");
    }

    #[test]
    fn test_ledger_errors_map_to_statuses() {
        assert_eq!(Error::from(LedgerError::InsufficientCredits).status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(Error::from(LedgerError::InvalidDelta(0)).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::from(LedgerError::UserNotFound(3)).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::from(LedgerError::Database(DbError::Other(anyhow::anyhow!("boom")))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_relay_error_codes() {
        assert_eq!(Error::InsufficientCredits.code(), "credit_insufficient");
        assert_eq!(Error::NoChannelAvailable { model: "x".into() }.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(Error::BadRequest { message: "no model".into() }.code(), "invalid_request");
    }
}
