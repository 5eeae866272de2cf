//! The admission pipeline behind every relay route.
//!
//! ```text
//! identity ─▶ model ─▶ quota ─▶ cost ─▶ reserve ─▶ route ─▶ forward ─▶ finalize
//!   401/403    400      429     500    402/500    502       502     commit | revert
//! ```
//!
//! Quota failures fail open inside [`QuotaLimiter`](crate::quota::QuotaLimiter); every ledger
//! failure fails closed. Once a reservation exists it is owned by a [`Settlement`], so every
//! exit from here on resolves it.

use crate::{
    AppState,
    auth::CurrentUser,
    cost::resolve_cost,
    errors::{Error, Result},
    ledger::LedgerError,
    metrics::{CREDITS_RESERVED_TOTAL, record_request},
    quota::Admission,
    relay::{
        client_ip::ClientIp,
        finalize::{Reservation, Settlement, settle_on_completion},
        model::{RelayRoute, extract_model},
        proxy::response_headers,
        router::{RouteError, upstream_path},
    },
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{Span, debug, field, instrument};
use uuid::Uuid;

pub async fn chat_completions(
    State(state): State<AppState>,
    user: CurrentUser,
    client_ip: ClientIp,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    relay(state, user, client_ip, RelayRoute::ChatCompletions, method, uri, headers, body).await
}

pub async fn messages(
    State(state): State<AppState>,
    user: CurrentUser,
    client_ip: ClientIp,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    relay(state, user, client_ip, RelayRoute::Messages, method, uri, headers, body).await
}

pub async fn generate_content(
    State(state): State<AppState>,
    user: CurrentUser,
    client_ip: ClientIp,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    relay(state, user, client_ip, RelayRoute::GenerateContent, method, uri, headers, body).await
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(user_id = user.id, route = route.as_str(), model = field::Empty))]
async fn relay(
    state: AppState,
    user: CurrentUser,
    ClientIp(ip_address): ClientIp,
    route: RelayRoute,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let model = extract_model(route, uri.path(), &body).map_err(|e| {
        record_request("invalid_request");
        Error::BadRequest { message: e.to_string() }
    })?;
    Span::current().record("model", model.as_str());

    if let Admission::Denied(denial) = state.quota.admit(user.id, user.level, &model).await {
        record_request("quota_denied");
        return Err(Error::QuotaExceeded(denial));
    }

    let rules = state.catalog.credit_rules().await.inspect_err(|_| record_request("internal_error"))?;
    let cost = resolve_cost(&model, &rules, state.config.credits.default_cost());

    let reservation = if cost > 0 {
        match state.ledger.reserve(user.id, &model, cost, Uuid::new_v4()).await {
            Ok(transaction_id) => {
                debug!(transaction_id, cost, "Credits reserved");
                metrics::counter!(CREDITS_RESERVED_TOTAL, "model" => model.clone()).increment(cost as u64);
                Some(Reservation { transaction_id, cost })
            }
            Err(LedgerError::InsufficientCredits) => {
                record_request("insufficient_credits");
                return Err(Error::InsufficientCredits);
            }
            Err(e) => {
                record_request("internal_error");
                return Err(e.into());
            }
        }
    } else {
        debug!("Zero cost model, relaying unmetered");
        None
    };

    let mut settlement = Settlement::new(
        state.ledger.clone(),
        state.audit.clone(),
        user.id,
        model.clone(),
        ip_address,
        reservation,
    );

    let channel = match state.router.pick(&model).await {
        Ok(channel) => channel,
        Err(RouteError::NoChannelAvailable(model)) => {
            settlement.revert(0, "no channel available").await;
            record_request("no_channel");
            return Err(Error::NoChannelAvailable { model });
        }
        Err(RouteError::Database(e)) => {
            settlement.revert(0, "failed to load channels").await;
            record_request("internal_error");
            return Err(e.into());
        }
    };

    let path = upstream_path(&model, uri.query());
    let upstream = match state.proxy.forward(method, &headers, body, &channel, &path).await {
        Ok(upstream) => upstream,
        Err(e) => {
            settlement.revert(0, e.to_string()).await;
            record_request("upstream_unreachable");
            return Err(e.into());
        }
    };

    let status = upstream.status();
    settlement.set_status(status.as_u16());
    let headers = response_headers(upstream.headers());

    let body = if status.is_success() {
        record_request("relayed");
        Body::from_stream(settle_on_completion(upstream.bytes_stream().boxed(), settlement, status.as_u16()))
    } else {
        settlement.revert(status.as_u16(), format!("upstream returned {status}")).await;
        record_request("upstream_error");
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
