//! Fallback responses for filters that give up on the upstream.
//!
//! A redirect fallback answers `307 Temporary Redirect` with
//! `Location: <fallbackUri>?exceptionMessage=<encoded message>`. A
//! `forward:` fallback sends the original request, headers and body
//! included, to the fallback target and returns whatever it answers.

use crate::domain::error::{text_response, ProxyError};
use crate::domain::filters::Fallback;
use crate::pipeline::upstream::upstream_uri;
use crate::ports::outbound::UpstreamClient;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Append `exceptionMessage=<message>` to `target`, form-urlencoded.
pub fn with_exception_message(target: &str, message: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{target}{separator}exceptionMessage={encoded}")
}

/// Response extension marking an answer produced by a fallback in place of
/// the upstream. Carries the failure message that triggered it, so an
/// enclosing circuit breaker still records the call as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackCause(pub String);

pub struct FallbackHandler {
    route_id: String,
    fallback: Fallback,
    /// Resolves relative `forward:` targets
    base: Uri,
    upstream: Arc<dyn UpstreamClient>,
}

impl FallbackHandler {
    pub fn new(
        route_id: impl Into<String>,
        fallback: Fallback,
        base: Uri,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            fallback,
            base,
            upstream,
        }
    }

    pub fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    /// Forwarding replays the original request, so its body must be kept.
    pub fn needs_request_body(&self) -> bool {
        matches!(self.fallback, Fallback::Forward(_))
    }

    /// Answer the client on behalf of a failed upstream call.
    ///
    /// `original` is required for forwarding; without it an empty `GET`
    /// is sent to the forward target.
    pub async fn respond(&self, original: Option<Request<Body>>, message: &str) -> Response {
        let mut response = self.answer(original, message).await;
        response
            .extensions_mut()
            .insert(FallbackCause(message.to_string()));
        response
    }

    async fn answer(&self, original: Option<Request<Body>>, message: &str) -> Response {
        let target = with_exception_message(self.fallback.target(), message);

        match &self.fallback {
            Fallback::Redirect(_) => {
                info!(route_id = %self.route_id, location = %target, "Redirecting to fallback");
                redirect_response(&target)
            }
            Fallback::Forward(_) => {
                let uri = match self.resolve(&target) {
                    Ok(uri) => uri,
                    Err(e) => {
                        error!(route_id = %self.route_id, target = %target, error = %e, "Invalid forward fallback");
                        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Invalid fallback target");
                    }
                };

                let mut req = original.unwrap_or_else(|| Request::new(Body::empty()));
                *req.uri_mut() = uri;
                info!(route_id = %self.route_id, target = %req.uri(), "Forwarding to fallback");

                match self.upstream.send(req).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(route_id = %self.route_id, error = %e, "Fallback forward failed");
                        e.into_response()
                    }
                }
            }
        }
    }

    fn resolve(&self, target: &str) -> Result<Uri, ProxyError> {
        let uri: Uri = target
            .parse()
            .map_err(|e| ProxyError::Request(format!("{e}")))?;
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri);
        }
        if target.starts_with('/') {
            return upstream_uri(&self.base, &uri);
        }
        Err(ProxyError::Request(format!(
            "forward target '{target}' is neither absolute nor a path"
        )))
    }
}

fn redirect_response(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    response
}
