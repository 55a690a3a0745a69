//! Body handling for the forwarding pipeline.
//!
//! Response bodies are observed with a tee ([`capture`]) so a filter can
//! inspect a failed attempt without consuming the stream twice. Request
//! bodies are buffered once ([`ReplayableRequest`]) so every retry attempt
//! sends identical bytes.

pub mod capture;
pub mod replay;

pub use capture::{capture, drain, BodyCapture, CapturedExchange, TeeStream};
pub use replay::ReplayableRequest;

use crate::domain::error::ProxyError;
use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

/// Read a whole body, failing once it grows past `limit` bytes.
pub async fn collect_limited(
    headers: &HeaderMap,
    body: Body,
    limit: usize,
) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::PayloadTooLarge { limit });
    }

    let mut stream = std::pin::pin!(body.into_data_stream());
    let mut buf = BytesMut::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::Body(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
