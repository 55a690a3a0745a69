//! Error types for the forwarding pipeline and the gateway process.
//!
//! [`ProxyError`] is the error type every filter in a route chain speaks.
//! A filter either resolves a `ProxyError` into a response (fallback, fixed
//! status) or hands it unchanged to the next outer filter.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;

/// Kind names used by `retryExceptions` allow-lists.
pub mod kinds {
    pub const CONNECT: &str = "ConnectError";
    pub const TIMEOUT: &str = "TimeoutError";
    pub const BODY: &str = "BodyError";
    pub const REQUEST: &str = "RequestError";
    pub const UPSTREAM_STATUS: &str = "UpstreamStatusError";
    pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";
    pub const PAYLOAD_TOO_LARGE: &str = "PayloadTooLarge";
}

/// Failure of a proxied call, as seen by the filters of a route chain.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// TCP/TLS connection to the upstream could not be established
    #[error("connection to upstream failed: {0}")]
    Connect(String),

    /// Transport-level timeout while talking to the upstream
    #[error("upstream request timed out: {0}")]
    Timeout(String),

    /// Upstream body could not be read or written
    #[error("upstream body error: {0}")]
    Body(String),

    /// Any other transport failure
    #[error("upstream request failed: {0}")]
    Request(String),

    /// Synthesised from a 5xx or 429 response. The message starts with the
    /// numeric status so message-scanning failure predicates can see it.
    #[error("{} {}: {}", .status.as_u16(), .status.canonical_reason().unwrap_or("Unknown Status"), .body)]
    UpstreamStatus {
        status: StatusCode,
        headers: HeaderMap,
        body: UpstreamBody,
    },

    /// Retry filter gave up; wraps the last attempt's failure
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ProxyError>,
    },

    /// Request body too large to buffer for replay
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl ProxyError {
    /// Name matched against a route's `retryExceptions` list.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProxyError::Connect(_) => kinds::CONNECT,
            ProxyError::Timeout(_) => kinds::TIMEOUT,
            ProxyError::Body(_) => kinds::BODY,
            ProxyError::Request(_) => kinds::REQUEST,
            ProxyError::UpstreamStatus { .. } => kinds::UPSTREAM_STATUS,
            ProxyError::RetriesExhausted { .. } => kinds::RETRIES_EXHAUSTED,
            ProxyError::PayloadTooLarge { .. } => kinds::PAYLOAD_TOO_LARGE,
        }
    }

    /// Unwraps exactly one retries-exhausted layer.
    pub fn root_cause(&self) -> &ProxyError {
        match self {
            ProxyError::RetriesExhausted { source, .. } => source,
            other => other,
        }
    }

    /// Status the client sees when this error reaches the executor.
    pub fn status(&self) -> StatusCode {
        match self.root_cause() {
            ProxyError::Connect(_) | ProxyError::Body(_) | ProxyError::Request(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamStatus { status, .. } => *status,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Propagated failures keep the upstream's status, headers and body bytes.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ProxyError::RetriesExhausted { source, .. } => *source,
            other => other,
        };

        match error {
            ProxyError::UpstreamStatus {
                status,
                mut headers,
                body,
            } => {
                // The body may be re-framed, so the length is recomputed.
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::TRANSFER_ENCODING);

                let mut response = Response::new(body.into_body());
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            other => text_response(status, other.to_string()),
        }
    }
}

/// Body of a failed upstream response.
///
/// `excerpt` is the captured prefix that feeds the error message. `head`
/// holds every byte read so far and `rest` the part nobody has read yet,
/// so a propagated failure still reaches the client byte for byte.
/// Dropping an `UpstreamBody` with a `rest` aborts the upstream stream.
pub struct UpstreamBody {
    excerpt: Bytes,
    head: Bytes,
    rest: Mutex<Option<Body>>,
}

impl UpstreamBody {
    /// A body that was read to the end.
    pub fn complete(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            excerpt: bytes.clone(),
            head: bytes,
            rest: Mutex::new(None),
        }
    }

    /// A body whose reading stopped once `excerpt` was captured.
    pub fn partial(excerpt: Bytes, head: Bytes, rest: Body) -> Self {
        Self {
            excerpt,
            head,
            rest: Mutex::new(Some(rest)),
        }
    }

    pub fn excerpt(&self) -> &Bytes {
        &self.excerpt
    }

    /// More bytes follow the excerpt.
    pub fn is_partial(&self) -> bool {
        self.excerpt.len() < self.head.len() || self.rest.lock().is_some()
    }

    /// The full body: bytes already read followed by the unread remainder.
    pub fn into_body(self) -> Body {
        match self.rest.into_inner() {
            None => Body::from(self.head),
            Some(rest) => {
                let head = stream::once(future::ready(Ok::<_, axum::Error>(self.head)));
                Body::from_stream(head.chain(rest.into_data_stream()))
            }
        }
    }
}

impl fmt::Display for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.excerpt))
    }
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("excerpt", &self.excerpt.len())
            .field("head", &self.head.len())
            .field("partial", &self.is_partial())
            .finish()
    }
}

impl From<&str> for UpstreamBody {
    fn from(text: &str) -> Self {
        Self::complete(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Plain-text response helper shared by the filters.
pub fn text_response(status: StatusCode, body: impl Into<String>) -> Response {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Gateway-level errors (startup, configuration, serving)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Route source failed
    #[error("route provider error: {0}")]
    Provider(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
