//! Transparent upstream forwarding.
//!
//! The proxy never interprets the upstream response. It swaps the caller's credential for the
//! channel's, strips hop-by-hop headers in both directions and hands the streaming response
//! back to the pipeline.

use crate::config::RelayConfig;
use crate::db::models::channels::Channel;
use crate::relay::router::upstream_url;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, instrument};

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers carrying the caller's gateway credential.
const CALLER_CREDENTIAL_HEADERS: &[&str] = &["authorization", "x-api-key"];

/// No response was received from the upstream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Headers sent upstream: the inbound set minus credentials, `Host`, `Content-Length` and
/// hop-by-hop headers, plus the channel's bearer token when it has one.
pub fn outbound_headers(inbound: &HeaderMap, channel_api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || CALLER_CREDENTIAL_HEADERS.contains(&name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if !channel_api_key.is_empty()
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {channel_api_key}"))
    {
        headers.insert(header::AUTHORIZATION, value);
    }
    headers
}

/// Upstream response headers relayed to the caller. Framing headers are dropped because the
/// body is re-streamed by the local server.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

pub struct RelayProxy {
    client: reqwest::Client,
}

impl RelayProxy {
    pub fn new(config: &RelayConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Send the request to `channel` at `path`.
    ///
    /// Any upstream status, 2xx or not, is a successful forward. Only failing to get a
    /// response at all is an error.
    #[instrument(skip(self, headers, body, channel), fields(channel = %channel.name, channel_id = channel.id), err)]
    pub async fn forward(
        &self,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
        channel: &Channel,
        path: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let target = upstream_url(&channel.base_url, path);
        let url = reqwest::Url::parse(&target).map_err(|e| TransportError::InvalidUrl(format!("{target}: {e}")))?;

        let response = self
            .client
            .request(method, url)
            .headers(outbound_headers(headers, &channel.api_key))
            .body(body)
            .send()
            .await?;

        debug!(status = %response.status(), "Upstream responded");
        Ok(response)
    }
}
