//! Provider-compatible relay surface.
//!
//! Three inbound shapes are accepted and forwarded byte for byte:
//!
//! | Route | Model taken from |
//! |-------|------------------|
//! | `POST /v1/chat/completions` | `model` field of the JSON body |
//! | `POST /v1/messages` | `model` field of the JSON body |
//! | `POST /v1beta/models/{model}:{action}` | last path segment, before `:` |
//!
//! The upstream path is derived from the model family, not from the inbound route, so a
//! `claude-*` model sent to the chat completions route still reaches the channel's messages
//! endpoint.

pub mod client_ip;
pub mod finalize;
pub mod handlers;
pub mod model;
pub mod proxy;
pub mod router;

use crate::AppState;
use axum::{Router, extract::DefaultBodyLimit, routing::post};

pub use proxy::RelayProxy;
pub use router::ChannelRouter;

/// Relay routes. Callers must layer authentication on top.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1beta/models/{*path}", post(handlers::generate_content))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
