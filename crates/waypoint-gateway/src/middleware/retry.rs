//! Retry filter.
//!
//! The request is buffered once and replayed for every attempt. Failure
//! statuses are observed through the body interceptor and turned into
//! [`ProxyError::UpstreamStatus`] so they classify like any other error.

use crate::body::{CapturedExchange, ReplayableRequest};
use crate::domain::classify::{classify_error, is_failure_status};
use crate::domain::error::ProxyError;
use crate::domain::filters::RetryConfig;
use crate::middleware::fallback::FallbackHandler;
use crate::middleware::metrics::GatewayMetrics;
use axum::{body::Body, http::Request, response::Response};
use std::sync::Arc;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

pub struct RetryFilter {
    pub config: RetryConfig,
    pub fallback: Option<FallbackHandler>,
    pub max_request_body: usize,
    /// Bytes of a failed response kept for its error message
    pub max_capture_bytes: usize,
    pub metrics: Arc<GatewayMetrics>,
}

/// Retry layer
#[derive(Clone)]
pub struct RetryLayer {
    filter: Arc<RetryFilter>,
}

impl RetryLayer {
    pub fn new(filter: RetryFilter) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            filter: Arc::clone(&self.filter),
        }
    }
}

/// Retry service
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    filter: Arc<RetryFilter>,
}

impl<S> Service<Request<Body>> for RetryService<S>
where
    S: Service<Request<Body>, Response = Response, Error = ProxyError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = ProxyError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let filter = Arc::clone(&self.filter);
        let inner = self.inner.clone();

        Box::pin(async move {
            let config = &filter.config;
            let replay = ReplayableRequest::buffer(req, filter.max_request_body).await?;

            let mut attempt = 1;
            let failure = loop {
                let err = match inner.clone().oneshot(replay.to_request()).await {
                    Ok(response) if is_failure_status(response.status()) => {
                        CapturedExchange::observe(response, filter.max_capture_bytes)
                            .await
                            .into_error()
                    }
                    Ok(response) => return Ok(response),
                    Err(err) => err,
                };

                if !classify_error(&err, &config.retryable_errors).retryable {
                    debug!(
                        route_id = %config.route_id,
                        attempt,
                        error = %err,
                        "Upstream failure is not retryable"
                    );
                    break err;
                }

                if attempt >= config.max_attempts {
                    break ProxyError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    };
                }

                warn!(
                    route_id = %config.route_id,
                    attempt,
                    max_attempts = config.max_attempts,
                    wait_ms = config.wait_duration.as_millis() as u64,
                    error = %err,
                    "Retrying upstream call"
                );
                filter.metrics.record_retry();
                // Closes any unread upstream body before waiting.
                drop(err);
                tokio::time::sleep(config.wait_duration).await;
                attempt += 1;
            };

            match &filter.fallback {
                Some(fallback) => {
                    let message = failure.root_cause().to_string();
                    warn!(route_id = %config.route_id, attempts = attempt, error = %message, "Retry giving up, using fallback");
                    filter.metrics.record_fallback();
                    Ok(fallback.respond(Some(replay.to_request()), &message).await)
                }
                None => {
                    warn!(route_id = %config.route_id, attempts = attempt, error = %failure, "Retry giving up");
                    Err(failure)
                }
            }
        })
    }
}
