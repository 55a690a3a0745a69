//! Builds a route's filter chain from its declarations.
//!
//! Chain order is fixed regardless of declaration order:
//!
//! ```text
//! RateLimiter ─► CircuitBreaker ─► TimeLimiter ─► Retry ─► Upstream
//! ```
//!
//! The time limiter encloses the retry filter so one deadline covers the
//! whole retry sequence that the breaker records as a single call.

use super::matcher::RouteMatcher;
use super::registry::ResilienceRegistry;
use super::upstream::{parse_upstream_base, UpstreamService};
use super::RouteService;
use crate::domain::config::LimitsConfig;
use crate::domain::filters::{Fallback, FilterKind, FilterSpec};
use crate::domain::route::RouteDefinition;
use crate::middleware::circuit_breaker::{CircuitBreakerFilter, CircuitBreakerLayer};
use crate::middleware::fallback::FallbackHandler;
use crate::middleware::metrics::GatewayMetrics;
use crate::middleware::rate_limit::RateLimitLayer;
use crate::middleware::retry::{RetryFilter, RetryLayer};
use crate::middleware::time_limiter::TimeLimiterLayer;
use crate::ports::outbound::UpstreamClient;
use axum::http::{Method, Uri};
use std::sync::Arc;
use tower::Layer;
use tracing::{debug, error, info, warn};

/// A route that could not be compiled at all. The route is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route '{route_id}': invalid matcher: {reason}")]
    InvalidMatcher { route_id: String, reason: String },

    #[error("route '{route_id}': invalid upstream uri '{uri}': {reason}")]
    InvalidUpstream {
        route_id: String,
        uri: String,
        reason: String,
    },
}

/// One route ready to serve traffic.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub route_id: String,
    pub version: u64,
    pub matcher: RouteMatcher,
    pub upstream: Uri,
    /// Active filters, outermost first
    pub filters: Vec<FilterKind>,
    pub service: RouteService,
}

impl CompiledRoute {
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.matcher.matches(method, path)
    }
}

/// Parsed declarations of one route, at most one per filter kind.
#[derive(Debug, Default)]
struct ParsedFilters {
    rate_limiter: Option<FilterSpec>,
    circuit_breaker: Option<FilterSpec>,
    time_limiter: Option<FilterSpec>,
    retry: Option<FilterSpec>,
}

impl ParsedFilters {
    fn slot(&mut self, kind: FilterKind) -> &mut Option<FilterSpec> {
        match kind {
            FilterKind::RateLimiter => &mut self.rate_limiter,
            FilterKind::CircuitBreaker => &mut self.circuit_breaker,
            FilterKind::TimeLimiter => &mut self.time_limiter,
            FilterKind::Retry => &mut self.retry,
        }
    }

    fn is_empty(&self) -> bool {
        self.rate_limiter.is_none()
            && self.circuit_breaker.is_none()
            && self.time_limiter.is_none()
            && self.retry.is_none()
    }
}

pub struct FilterAssembler {
    upstream: Arc<dyn UpstreamClient>,
    registry: Arc<ResilienceRegistry>,
    metrics: Arc<GatewayMetrics>,
    limits: LimitsConfig,
}

impl FilterAssembler {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        registry: Arc<ResilienceRegistry>,
        metrics: Arc<GatewayMetrics>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            upstream,
            registry,
            metrics,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// Compile one route definition into a serving chain.
    ///
    /// A malformed filter declaration only drops that filter; a malformed
    /// path, method or upstream URI drops the whole route.
    pub fn assemble(&self, route: &RouteDefinition) -> Result<CompiledRoute, RouteError> {
        let route_id = route.route_id.as_str();
        let matcher = RouteMatcher::new(&route.path, route.method.as_deref()).map_err(|reason| {
            RouteError::InvalidMatcher {
                route_id: route_id.to_string(),
                reason,
            }
        })?;
        let base = parse_upstream_base(&route.uri).map_err(|reason| RouteError::InvalidUpstream {
            route_id: route_id.to_string(),
            uri: route.uri.clone(),
            reason,
        })?;

        let parsed = parse_filters(route);
        if parsed.is_empty() {
            warn!(route_id, "Route has no usable filters, serving as a bare proxy");
        }

        let mut filters = Vec::new();
        let mut service = RouteService::new(UpstreamService::new(
            base.clone(),
            Arc::clone(&self.upstream),
        ));

        if let Some(FilterSpec::Retry(config)) = parsed.retry {
            let fallback = self.fallback(route_id, config.fallback.clone(), &base);
            let layer = RetryLayer::new(RetryFilter {
                config,
                fallback,
                max_request_body: self.limits.max_request_body,
                max_capture_bytes: self.limits.max_capture_bytes,
                metrics: Arc::clone(&self.metrics),
            });
            service = RouteService::new(layer.layer(service));
            filters.push(FilterKind::Retry);
        }

        if let Some(FilterSpec::TimeLimiter(config)) = parsed.time_limiter {
            let layer = TimeLimiterLayer::new(config, Arc::clone(&self.metrics));
            service = RouteService::new(layer.layer(service));
            filters.push(FilterKind::TimeLimiter);
        }

        if let Some(FilterSpec::CircuitBreaker(config)) = parsed.circuit_breaker {
            let fallback = self.fallback(route_id, config.fallback.clone(), &base);
            let breaker = self.registry.circuit_breaker(route.version, config);
            let layer = CircuitBreakerLayer::new(CircuitBreakerFilter {
                breaker,
                fallback,
                max_request_body: self.limits.max_request_body,
                metrics: Arc::clone(&self.metrics),
            });
            service = RouteService::new(layer.layer(service));
            filters.push(FilterKind::CircuitBreaker);
        }

        if let Some(FilterSpec::RateLimiter(config)) = parsed.rate_limiter {
            let state = self.registry.rate_limiter(route.version, config);
            service = RouteService::new(RateLimitLayer::new(state).layer(service));
            filters.push(FilterKind::RateLimiter);
        }

        filters.reverse();
        info!(
            route_id,
            version = route.version,
            path = %matcher.path(),
            upstream = %base,
            filters = ?filters,
            "Route assembled"
        );

        Ok(CompiledRoute {
            route_id: route_id.to_string(),
            version: route.version,
            matcher,
            upstream: base,
            filters,
            service,
        })
    }

    fn fallback(&self, route_id: &str, fallback: Option<Fallback>, base: &Uri) -> Option<FallbackHandler> {
        fallback.map(|fallback| {
            FallbackHandler::new(route_id, fallback, base.clone(), Arc::clone(&self.upstream))
        })
    }
}

/// Parse every declaration; invalid ones are logged and skipped, and the
/// first valid declaration of each kind wins.
fn parse_filters(route: &RouteDefinition) -> ParsedFilters {
    let mut parsed = ParsedFilters::default();

    for decl in &route.filters {
        let spec = match FilterSpec::parse(&route.route_id, decl) {
            Ok(spec) => spec,
            Err(e) => {
                error!(route_id = %route.route_id, filter = %decl.name, error = %e, "Skipping filter");
                continue;
            }
        };

        let slot = parsed.slot(spec.kind());
        if slot.is_some() {
            warn!(route_id = %route.route_id, filter = %decl.name, "Duplicate filter ignored");
            continue;
        }
        debug!(route_id = %route.route_id, filter = %decl.name, "Filter parsed");
        *slot = Some(spec);
    }

    parsed
}
