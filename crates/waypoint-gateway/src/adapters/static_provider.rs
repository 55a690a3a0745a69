//! In-memory route source, replaceable at runtime.

use crate::domain::route::RouteDefinition;
use crate::ports::outbound::{ProviderError, RouteConfigProvider};
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
pub struct StaticRouteProvider {
    routes: RwLock<Vec<RouteDefinition>>,
}

impl StaticRouteProvider {
    pub fn new(routes: Vec<RouteDefinition>) -> Self {
        Self {
            routes: RwLock::new(routes),
        }
    }

    /// Replace the whole route set; picked up on the next reload.
    pub fn set_routes(&self, routes: Vec<RouteDefinition>) {
        *self.routes.write() = routes;
    }

    /// Insert or replace a route by id.
    pub fn upsert(&self, route: RouteDefinition) {
        let mut routes = self.routes.write();
        match routes.iter_mut().find(|r| r.route_id == route.route_id) {
            Some(existing) => *existing = route,
            None => routes.push(route),
        }
    }

    pub fn remove(&self, route_id: &str) {
        self.routes.write().retain(|r| r.route_id != route_id);
    }
}

#[async_trait]
impl RouteConfigProvider for StaticRouteProvider {
    async fn load_routes(&self) -> Result<Vec<RouteDefinition>, ProviderError> {
        Ok(self.routes.read().clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
