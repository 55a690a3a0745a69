//! Outbound ports for the gateway.

use crate::domain::error::ProxyError;
use crate::domain::route::RouteDefinition;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

/// Sends one fully-formed request to an upstream.
///
/// The request URI is absolute. Implementations must not retry, follow
/// redirects or buffer the response body; the filters own those decisions.
/// Dropping the returned future must abort the in-flight call.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: Request<Body>) -> Result<Response, ProxyError>;
}

/// Read-only access to the externally stored route configuration.
///
/// Returns the current version of every route. The gateway polls this and
/// rebuilds its pipeline whenever a `(route_id, version)` pair changes.
#[async_trait]
pub trait RouteConfigProvider: Send + Sync {
    async fn load_routes(&self) -> Result<Vec<RouteDefinition>, ProviderError>;

    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Route source failures. The previous route table stays active.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("route source unreadable: {0}")]
    Io(String),

    #[error("route source malformed: {0}")]
    Parse(String),

    #[error("route source unavailable: {0}")]
    Unavailable(String),
}
