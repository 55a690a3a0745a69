//! Hot reload of the route table.
//!
//! The provider is polled on a fixed interval and on demand. A new table is
//! built in full and swapped in only when the set of `(route_id, version)`
//! pairs changed; requests already running finish on their old snapshot.

use super::assembler::FilterAssembler;
use super::table::{Fingerprint, RouteSnapshot, RouteTable};
use crate::domain::filters::FilterKind;
use crate::domain::route::RouteDefinition;
use crate::middleware::metrics::GatewayMetrics;
use crate::ports::outbound::{ProviderError, RouteConfigProvider};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of one reload pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// Nothing changed; the current table stays
    Unchanged { routes: usize },
    /// A new table was swapped in
    Reloaded { routes: usize, skipped: usize },
}

pub struct RouteReloader {
    provider: Arc<dyn RouteConfigProvider>,
    assembler: FilterAssembler,
    table: Arc<RouteTable>,
    metrics: Arc<GatewayMetrics>,
    interval: Duration,
    /// Serialises polls and forced reloads
    running: Mutex<()>,
}

impl RouteReloader {
    pub fn new(
        provider: Arc<dyn RouteConfigProvider>,
        assembler: FilterAssembler,
        table: Arc<RouteTable>,
        metrics: Arc<GatewayMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            assembler,
            table,
            metrics,
            interval,
            running: Mutex::new(()),
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn assembler(&self) -> &FilterAssembler {
        &self.assembler
    }

    /// Fetch routes and rebuild the table if they changed, or unconditionally
    /// when `force` is set. Provider errors leave the current table in place.
    pub async fn reload(&self, force: bool) -> Result<ReloadOutcome, ProviderError> {
        let _running = self.running.lock().await;

        let routes = match self.provider.load_routes().await {
            Ok(routes) => dedupe(routes),
            Err(e) => {
                self.metrics.record_reload(false);
                warn!(source = %self.provider.describe(), error = %e, "Route reload failed, keeping current routes");
                return Err(e);
            }
        };

        let fingerprint: Fingerprint = routes
            .iter()
            .map(|route| (route.route_id.clone(), route.version))
            .collect();

        if !force && fingerprint == *self.table.load().fingerprint() {
            debug!(routes = routes.len(), "Routes unchanged");
            return Ok(ReloadOutcome::Unchanged {
                routes: routes.len(),
            });
        }

        let mut compiled = Vec::with_capacity(routes.len());
        let mut skipped = 0;
        for route in &routes {
            match self.assembler.assemble(route) {
                Ok(route) => compiled.push(route),
                Err(e) => {
                    error!(route_id = %route.route_id, error = %e, "Skipping route");
                    skipped += 1;
                }
            }
        }

        let with = |kind: FilterKind| -> HashSet<String> {
            compiled
                .iter()
                .filter(|route| route.filters.contains(&kind))
                .map(|route| route.route_id.clone())
                .collect()
        };
        let breakers = with(FilterKind::CircuitBreaker);
        let limiters = with(FilterKind::RateLimiter);

        let count = compiled.len();
        self.table.store(RouteSnapshot::new(compiled, fingerprint));
        self.assembler.registry().retain(&breakers, &limiters);
        self.metrics.record_reload(true);

        info!(
            source = %self.provider.describe(),
            routes = count,
            skipped,
            "Route table reloaded"
        );
        Ok(ReloadOutcome::Reloaded {
            routes: count,
            skipped,
        })
    }

    /// Poll the provider forever. The first tick fires immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            // Failures are logged inside reload and retried next tick.
            let _ = self.reload(false).await;
        }
    }
}

/// A route id may appear once; later duplicates are dropped.
fn dedupe(routes: Vec<RouteDefinition>) -> Vec<RouteDefinition> {
    let mut seen = HashSet::new();
    routes
        .into_iter()
        .filter(|route| {
            let first = seen.insert(route.route_id.clone());
            if !first {
                warn!(route_id = %route.route_id, version = route.version, "Duplicate route id ignored");
            }
            first
        })
        .collect()
}
