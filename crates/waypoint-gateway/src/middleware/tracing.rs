//! Request tracing.
//!
//! Every proxied request runs inside a `proxy_request` span carrying the
//! request id. An incoming W3C `traceparent` is recorded on the span and
//! forwarded untouched to the upstream.

use crate::domain::correlation::{RequestId, REQUEST_ID_HEADER};
use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

/// Tracing layer that creates spans for each request
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        // Take the service that was driven to readiness.
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let request_id = RequestId::from_headers(req.headers());
        if let Some(value) = request_id.header_value() {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let span = info_span!(
            "proxy_request",
            request_id = %request_id,
            http.method = %req.method(),
            http.target = %req.uri().path(),
            trace_id = field::Empty,
            parent_span_id = field::Empty,
            http.status_code = field::Empty,
            otel.status_code = field::Empty,
        );

        if let Some(parent) = parse_traceparent(&req) {
            span.record("trace_id", parent.trace_id);
            span.record("parent_span_id", parent.parent_id);
        }

        req.extensions_mut().insert(request_id.clone());

        Box::pin(
            async move {
                let mut result = inner.call(req).await;

                match &mut result {
                    Ok(response) => {
                        let status = response.status();
                        let span = Span::current();
                        span.record("http.status_code", status.as_u16());
                        span.record(
                            "otel.status_code",
                            if status.is_server_error() { "ERROR" } else { "OK" },
                        );
                        if let Some(value) = request_id.header_value() {
                            response.headers_mut().insert(REQUEST_ID_HEADER, value);
                        }
                    }
                    Err(_) => {
                        Span::current().record("otel.status_code", "ERROR");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

struct TraceParent<'a> {
    trace_id: &'a str,
    parent_id: &'a str,
}

/// Parse `version-trace_id-parent_id-trace_flags` (W3C Trace Context).
fn parse_traceparent<B>(req: &Request<B>) -> Option<TraceParent<'_>> {
    let traceparent = req.headers().get("traceparent")?.to_str().ok()?;

    let parts: Vec<&str> = traceparent.split('-').collect();
    if parts.len() != 4 || parts[1].len() != 32 || parts[2].len() != 16 {
        return None;
    }

    Some(TraceParent {
        trace_id: parts[1],
        parent_id: parts[2],
    })
}
