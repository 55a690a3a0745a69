//! `reqwest`-backed upstream client.
//!
//! Request bodies are read up to the configured limit before sending;
//! response bodies are streamed. Redirects are never followed and nothing
//! is retried here.

use crate::body::collect_limited;
use crate::domain::config::UpstreamConfig;
use crate::domain::error::{GatewayError, ProxyError};
use crate::ports::outbound::UpstreamClient;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request};
use axum::response::Response;
use std::error::Error as StdError;
use tracing::debug;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    max_request_body: usize,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig, max_request_body: usize) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("upstream client: {e}")))?;
        Ok(Self {
            client,
            max_request_body,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = collect_limited(&parts.headers, body, self.max_request_body).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let mut outbound = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(headers);
        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let upstream = outbound.send().await.map_err(from_reqwest)?;
        debug!(status = %upstream.status(), url = %upstream.url(), "Upstream responded");

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(listed.iter()) {
        headers.remove(name);
    }
}

fn from_reqwest(err: reqwest::Error) -> ProxyError {
    let message = error_chain(&err);
    if err.is_timeout() {
        ProxyError::Timeout(message)
    } else if err.is_connect() {
        ProxyError::Connect(message)
    } else if err.is_body() || err.is_decode() {
        ProxyError::Body(message)
    } else {
        ProxyError::Request(message)
    }
}

/// `err: cause: cause` down to the root.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
