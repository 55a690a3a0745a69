//! Compiled routes behind an atomically swappable snapshot.
//!
//! Readers take a cheap `Arc` of the current snapshot and keep serving from
//! it even if a reload swaps in a new one mid-request.

use super::assembler::CompiledRoute;
use arc_swap::ArcSwap;
use axum::http::Method;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// `(route_id, version)` pairs in provider order. A change means rebuild.
pub type Fingerprint = Vec<(String, u64)>;

#[derive(Debug)]
pub struct RouteSnapshot {
    routes: Vec<CompiledRoute>,
    fingerprint: Fingerprint,
    built_at: DateTime<Utc>,
}

impl RouteSnapshot {
    pub fn new(routes: Vec<CompiledRoute>, fingerprint: Fingerprint) -> Self {
        Self {
            routes,
            fingerprint,
            built_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// First route, in provider order, whose method and path match.
    pub fn find(&self, method: &Method, path: &str) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.matches(method, path))
    }

    pub fn get(&self, route_id: &str) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.route_id == route_id)
    }

    pub fn routes(&self) -> &[CompiledRoute] {
        &self.routes
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::empty()),
        }
    }

    pub fn load(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    pub fn store(&self, snapshot: RouteSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
