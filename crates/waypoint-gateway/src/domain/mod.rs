//! Domain types for the gateway.
//!
//! Route definitions, typed filter configuration, failure classification,
//! gateway configuration and error handling. Nothing in here performs I/O
//! except [`GatewayConfig::load`].

pub mod classify;
pub mod config;
pub mod correlation;
pub mod error;
pub mod filters;
pub mod route;

// Re-exports for convenience
pub use classify::{classify_error, classify_status, is_failure_status, Classification};
pub use config::{ConfigError, GatewayConfig, LimitsConfig, UpstreamConfig};
pub use correlation::{RequestId, REQUEST_ID_HEADER};
pub use error::{text_response, GatewayError, ProxyError};
pub use filters::{
    AssemblyError, CircuitBreakerConfig, FailurePredicateKind, Fallback, FilterKind, FilterSpec,
    RateLimiterConfig, RetryConfig, RetryableErrors, TimeLimiterConfig,
};
pub use route::{FilterDeclaration, RouteContext, RouteDefinition};
