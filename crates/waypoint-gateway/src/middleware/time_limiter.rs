//! Time limiter filter.
//!
//! Bounds one breaker-counted execution, retries included, to
//! `timeoutDuration`.

use crate::domain::error::{text_response, ProxyError};
use crate::domain::filters::TimeLimiterConfig;
use crate::middleware::metrics::GatewayMetrics;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tokio::time::timeout;
use tower::{Layer, Service, ServiceExt};
use tracing::warn;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again later.";

/// Time limiter layer
#[derive(Clone)]
pub struct TimeLimiterLayer {
    config: Arc<TimeLimiterConfig>,
    metrics: Arc<GatewayMetrics>,
}

impl TimeLimiterLayer {
    pub fn new(config: TimeLimiterConfig, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
        }
    }
}

impl<S> Layer<S> for TimeLimiterLayer {
    type Service = TimeLimiterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeLimiterService {
            inner,
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Time limiter service
#[derive(Clone)]
pub struct TimeLimiterService<S> {
    inner: S,
    config: Arc<TimeLimiterConfig>,
    metrics: Arc<GatewayMetrics>,
}

impl<S> Service<Request<Body>> for TimeLimiterService<S>
where
    S: Service<Request<Body>, Response = Response, Error = ProxyError> + Clone + Send + 'static,
    S::Future: Send + 'static,
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
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        let call = self.inner.clone().oneshot(req);

        Box::pin(async move {
            let limit = config.timeout_duration;

            let outcome = if config.cancel_on_timeout {
                // Dropping the future on expiry aborts the upstream request.
                timeout(limit, call).await.ok()
            } else {
                // Dropping a JoinHandle detaches the task; it runs to completion.
                match timeout(limit, tokio::spawn(call)).await {
                    Ok(Ok(result)) => Some(result),
                    Ok(Err(join_error)) => Some(Err(ProxyError::Request(format!(
                        "upstream task failed: {join_error}"
                    )))),
                    Err(_) => None,
                }
            };

            match outcome {
                Some(result) => result,
                None => {
                    metrics.record_timeout();
                    warn!(
                        route_id = %config.route_id,
                        timeout_ms = limit.as_millis() as u64,
                        cancelled = config.cancel_on_timeout,
                        "Request timed out"
                    );
                    Ok(text_response(StatusCode::GATEWAY_TIMEOUT, TIMEOUT_MESSAGE))
                }
            }
        })
    }
}
