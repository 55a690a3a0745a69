//! Innermost stage of every chain: rewrite the URI and call the upstream.

use super::ProxyFuture;
use crate::domain::error::ProxyError;
use crate::ports::outbound::UpstreamClient;
use axum::body::Body;
use axum::http::uri::{PathAndQuery, Scheme};
use axum::http::{Request, Uri};
use axum::response::Response;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Parse a route's upstream URI. Only scheme and authority are kept.
pub fn parse_upstream_base(raw: &str) -> Result<Uri, String> {
    let uri: Uri = raw.trim().parse().map_err(|e| format!("{e}"))?;
    let scheme = uri.scheme().ok_or("missing scheme")?;
    if *scheme != Scheme::HTTP && *scheme != Scheme::HTTPS {
        return Err(format!("unsupported scheme '{scheme}'"));
    }
    let authority = uri.authority().ok_or("missing host")?;
    Uri::builder()
        .scheme(scheme.clone())
        .authority(authority.clone())
        .path_and_query("/")
        .build()
        .map_err(|e| e.to_string())
}

/// Target URI: the base's scheme and authority with the request's path and query.
pub fn upstream_uri(base: &Uri, original: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = original
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|e| ProxyError::Request(format!("invalid upstream uri: {e}")))
}

/// Sends the request to the route's upstream.
#[derive(Clone)]
pub struct UpstreamService {
    base: Uri,
    client: Arc<dyn UpstreamClient>,
}

impl UpstreamService {
    pub fn new(base: Uri, client: Arc<dyn UpstreamClient>) -> Self {
        Self { base, client }
    }
}

impl Service<Request<Body>> for UpstreamService {
    type Response = Response;
    type Error = ProxyError;
    type Future = ProxyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let base = self.base.clone();
        let client = Arc::clone(&self.client);

        Box::pin(async move {
            *req.uri_mut() = upstream_uri(&base, req.uri())?;
            client.send(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_keeps_scheme_and_authority_only() {
        let base = parse_upstream_base("http://inventory:8080/ignored?x=1").unwrap();
        assert_eq!(base, "http://inventory:8080/");
    }

    #[test]
    fn test_base_rejects_non_http() {
        assert!(parse_upstream_base("lb://inventory").is_err());
        assert!(parse_upstream_base("/relative").is_err());
        assert!(parse_upstream_base("not a uri").is_err());
    }

    #[test]
    fn test_request_path_and_query_preserved() {
        let base = parse_upstream_base("https://inventory.internal").unwrap();
        let original: Uri = "/inventory/items/42?expand=stock".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &original).unwrap(),
            "https://inventory.internal/inventory/items/42?expand=stock"
        );
    }
}
