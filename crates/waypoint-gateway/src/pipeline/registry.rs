//! Per-route resilience state that outlives a single route table.
//!
//! Breakers and token buckets are keyed by route id. A rebuild of an
//! unchanged route version gets the same instance back, so its window and
//! bucket survive hot reloads.

use crate::domain::filters::{CircuitBreakerConfig, RateLimiterConfig};
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitStats};
use crate::middleware::metrics::GatewayMetrics;
use crate::middleware::rate_limit::RateLimitState;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

struct Slot<T, C> {
    version: u64,
    config: C,
    state: Arc<T>,
}

impl<T, C: PartialEq> Slot<T, C> {
    fn reusable(&self, version: u64, config: &C) -> bool {
        self.version == version && self.config == *config
    }
}

pub struct ResilienceRegistry {
    breakers: DashMap<String, Slot<CircuitBreaker, CircuitBreakerConfig>>,
    limiters: DashMap<String, Slot<RateLimitState, RateLimiterConfig>>,
    metrics: Arc<GatewayMetrics>,
}

impl ResilienceRegistry {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            breakers: DashMap::new(),
            limiters: DashMap::new(),
            metrics,
        }
    }

    /// Breaker for `config.route_id`, reused while version and config are unchanged.
    pub fn circuit_breaker(&self, version: u64, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let route_id = config.route_id.clone();
        if let Some(slot) = self.breakers.get(&route_id) {
            if slot.reusable(version, &config) {
                debug!(route_id = %route_id, version, "Reusing circuit breaker");
                return Arc::clone(&slot.state);
            }
        }

        info!(route_id = %route_id, version, breaker = %config.name, "Creating circuit breaker");
        let state = CircuitBreaker::new(config.clone());
        self.breakers.insert(
            route_id,
            Slot {
                version,
                config,
                state: Arc::clone(&state),
            },
        );
        state
    }

    /// Token bucket for `config.route_id`, reused while version and config are unchanged.
    pub fn rate_limiter(&self, version: u64, config: RateLimiterConfig) -> Arc<RateLimitState> {
        let route_id = config.route_id.clone();
        if let Some(slot) = self.limiters.get(&route_id) {
            if slot.reusable(version, &config) {
                debug!(route_id = %route_id, version, "Reusing rate limiter");
                return Arc::clone(&slot.state);
            }
        }

        info!(
            route_id = %route_id,
            version,
            replenish_rate = config.replenish_rate,
            burst_capacity = config.burst_capacity,
            "Creating rate limiter"
        );
        let state = Arc::new(RateLimitState::new(config.clone(), Arc::clone(&self.metrics)));
        self.limiters.insert(
            route_id,
            Slot {
                version,
                config,
                state: Arc::clone(&state),
            },
        );
        state
    }

    /// Drop state for routes that no longer declare the filter.
    pub fn retain(&self, breakers: &HashSet<String>, limiters: &HashSet<String>) {
        self.breakers.retain(|route_id, _| {
            let keep = breakers.contains(route_id);
            if !keep {
                info!(route_id = %route_id, "Dropping circuit breaker");
            }
            keep
        });
        self.limiters.retain(|route_id, _| {
            let keep = limiters.contains(route_id);
            if !keep {
                info!(route_id = %route_id, "Dropping rate limiter");
            }
            keep
        });
    }

    pub fn breaker(&self, route_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(route_id).map(|slot| Arc::clone(&slot.state))
    }

    pub fn limiter(&self, route_id: &str) -> Option<Arc<RateLimitState>> {
        self.limiters.get(route_id).map(|slot| Arc::clone(&slot.state))
    }

    /// Statistics for every live breaker, ordered by route id.
    pub fn breaker_stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .breakers
            .iter()
            .map(|slot| slot.state.stats())
            .collect();
        stats.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        stats
    }
}
