//! Resilience filters and request-level middleware.
//!
//! Filter order inside one route chain:
//! Request → RateLimit → CircuitBreaker → TimeLimiter → Retry → Upstream
//!
//! ## Circuit Breaker
//!
//! The circuit breaker prevents cascading failures when an upstream becomes
//! unhealthy. It tracks outcomes per route and opens once the failure rate
//! over its window reaches the threshold, rejecting calls immediately until
//! trial calls show the upstream has recovered.
//!
//! The [`TracingLayer`] sits outside every route chain and wraps the whole
//! proxy router.

pub mod circuit_breaker;
pub mod fallback;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod time_limiter;
pub mod tracing;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerFilter, CircuitBreakerLayer, CircuitState, CircuitStats, Permit,
};
pub use fallback::FallbackHandler;
pub use metrics::{GatewayMetrics, RequestTimer};
pub use rate_limit::{RateLimitLayer, RateLimitState};
pub use retry::{RetryFilter, RetryLayer};
pub use time_limiter::TimeLimiterLayer;
pub use tracing::TracingLayer;
