//! Request buffering for replay across retry attempts.

use super::collect_limited;
use crate::domain::error::ProxyError;
use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Method, Request, Uri, Version};
use bytes::Bytes;

/// An inbound request whose body has been read once and can be re-sent.
///
/// Every call to [`ReplayableRequest::to_request`] yields a fresh request
/// carrying the original method, URI, headers (including `Authorization`),
/// extensions and body bytes.
#[derive(Debug, Clone)]
pub struct ReplayableRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
}

impl ReplayableRequest {
    pub async fn buffer(req: Request<Body>, limit: usize) -> Result<Self, ProxyError> {
        let (parts, body) = req.into_parts();
        let body = collect_limited(&parts.headers, body, limit).await?;
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body,
        })
    }

    pub fn to_request(&self) -> Request<Body> {
        let mut req = Request::new(Body::from(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers.clone();
        *req.extensions_mut() = self.extensions.clone();
        req
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
