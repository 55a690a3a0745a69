//! Request rate limiting using a token bucket keyed by route id.
//!
//! Every caller of a route shares that route's bucket. The key comes from
//! the [`RouteContext`] extension the executor inserts; a request without
//! one is denied.

use crate::domain::error::text_response;
use crate::domain::filters::RateLimiterConfig;
use crate::domain::route::RouteContext;
use crate::middleware::metrics::GatewayMetrics;
use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const MISSING_KEY_MESSAGE: &str = "Rate limit key could not be resolved.";

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Bucket empty; tokens return after the given wait
    Exhausted { retry_after: Duration },
    /// More tokens requested than the bucket can ever hold
    InsufficientCapacity,
    /// No route key on the request
    MissingKey,
}

/// Token bucket state for one route, shared across requests
pub struct RateLimitState {
    config: RateLimiterConfig,
    requested: NonZeroU32,
    limiter: KeyedLimiter,
    metrics: Arc<GatewayMetrics>,
}

impl RateLimitState {
    pub fn new(config: RateLimiterConfig, metrics: Arc<GatewayMetrics>) -> Self {
        let quota = Quota::per_second(non_zero(config.replenish_rate))
            .allow_burst(non_zero(config.burst_capacity));
        Self {
            requested: non_zero(config.requested_tokens),
            limiter: RateLimiter::keyed(quota),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Take `requested_tokens` from the bucket of `key`.
    pub fn check(&self, key: Option<&str>) -> Result<(), Denial> {
        let Some(key) = key else {
            return Err(Denial::MissingKey);
        };

        match self.limiter.check_key_n(&key.to_string(), self.requested) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => Err(Denial::Exhausted {
                retry_after: not_until.wait_time_from(DefaultClock::default().now()),
            }),
            Err(_) => Err(Denial::InsufficientCapacity),
        }
    }
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limit layer
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
}

impl RateLimitLayer {
    pub fn new(state: Arc<RateLimitState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.state)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: Arc<RateLimitState>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
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
        let state = Arc::clone(&self.state);
        let inner = self.inner.clone();

        Box::pin(async move {
            let admitted = state.check(
                req.extensions()
                    .get::<RouteContext>()
                    .map(|ctx| ctx.route_id.as_str()),
            );

            match admitted {
                Ok(()) => {
                    debug!(route_id = %state.config.route_id, "Rate limit admitted");
                    inner.oneshot(req).await
                }
                Err(denial) => {
                    state.metrics.record_rate_limit_rejection();
                    warn!(
                        route_id = %state.config.route_id,
                        denial = ?denial,
                        "Rate limit exceeded"
                    );
                    Ok(denial_response(&denial))
                }
            }
        })
    }
}

/// Create rate limit rejection response
fn denial_response(denial: &Denial) -> Response {
    match denial {
        Denial::MissingKey => text_response(StatusCode::FORBIDDEN, MISSING_KEY_MESSAGE),
        Denial::InsufficientCapacity => {
            text_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE)
        }
        Denial::Exhausted { retry_after } => {
            let mut response = text_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ProxyError;
    use crate::pipeline::RouteService;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(replenish: u32, burst: u32, requested: u32) -> RateLimiterConfig {
        RateLimiterConfig {
            route_id: "inventory-read".into(),
            replenish_rate: replenish,
            burst_capacity: burst,
            requested_tokens: requested,
        }
    }

    fn routed_request() -> Request<Body> {
        let mut req = Request::builder().uri("/inventory").body(Body::empty()).unwrap();
        req.extensions_mut().insert(RouteContext {
            route_id: "inventory-read".into(),
            version: 1,
        });
        req
    }

    fn counting_upstream(calls: Arc<AtomicU32>) -> RouteService {
        RouteService::from_fn(move |_req| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProxyError>(text_response(StatusCode::OK, "ok"))
            }
        })
    }

    #[test]
    fn test_burst_then_reject() {
        let state = RateLimitState::new(test_config(1, 5, 1), Arc::new(GatewayMetrics::new()));
        for _ in 0..5 {
            assert!(state.check(Some("inventory-read")).is_ok());
        }
        assert!(matches!(
            state.check(Some("inventory-read")),
            Err(Denial::Exhausted { .. })
        ));
    }

    #[test]
    fn test_requested_tokens_consume_more() {
        let state = RateLimitState::new(test_config(1, 4, 2), Arc::new(GatewayMetrics::new()));
        assert!(state.check(Some("r")).is_ok());
        assert!(state.check(Some("r")).is_ok());
        assert!(state.check(Some("r")).is_err());
    }

    #[test]
    fn test_request_larger_than_burst_denied() {
        let state = RateLimitState::new(test_config(10, 2, 3), Arc::new(GatewayMetrics::new()));
        assert_eq!(state.check(Some("r")), Err(Denial::InsufficientCapacity));
    }

    #[test]
    fn test_missing_key_fails_closed() {
        let state = RateLimitState::new(test_config(10, 10, 1), Arc::new(GatewayMetrics::new()));
        assert_eq!(state.check(None), Err(Denial::MissingKey));
    }

    #[tokio::test]
    async fn test_service_rejects_b_plus_one() {
        let metrics = Arc::new(GatewayMetrics::new());
        let state = Arc::new(RateLimitState::new(test_config(10, 10, 1), Arc::clone(&metrics)));
        let calls = Arc::new(AtomicU32::new(0));
        let service = RateLimitLayer::new(state).layer(counting_upstream(Arc::clone(&calls)));

        for _ in 0..10 {
            let response = service.clone().oneshot(routed_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = service.clone().oneshot(routed_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], RATE_LIMITED_MESSAGE.as_bytes());

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(metrics.rate_limit_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_service_denies_unrouted_request() {
        let state = Arc::new(RateLimitState::new(
            test_config(10, 10, 1),
            Arc::new(GatewayMetrics::new()),
        ));
        let calls = Arc::new(AtomicU32::new(0));
        let service = RateLimitLayer::new(state).layer(counting_upstream(Arc::clone(&calls)));

        let req = Request::builder().uri("/inventory").body(Body::empty()).unwrap();
        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
