//! Entry point for proxy traffic.
//!
//! Matches the request against the current route snapshot, tags it with a
//! [`RouteContext`], runs the route's chain and turns whatever comes out
//! into exactly one response.

use super::table::RouteTable;
use crate::domain::error::{text_response, ProxyError};
use crate::domain::route::RouteContext;
use crate::middleware::metrics::{GatewayMetrics, RequestTimer};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct PipelineExecutor {
    table: Arc<RouteTable>,
    metrics: Arc<GatewayMetrics>,
}

impl PipelineExecutor {
    pub fn new(table: Arc<RouteTable>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { table, metrics }
    }

    /// Serve one request to completion.
    pub async fn execute(&self, mut req: Request<Body>) -> Response {
        let timer = RequestTimer::new(Arc::clone(&self.metrics));
        let snapshot = self.table.load();

        let Some(route) = snapshot.find(req.method(), req.uri().path()) else {
            debug!(method = %req.method(), path = %req.uri().path(), "No route matched");
            self.metrics.record_unrouted();
            timer.finish(true);
            return text_response(StatusCode::NOT_FOUND, "No route matches the request.");
        };

        let route_id = route.route_id.clone();
        let service = route.service.clone();
        req.extensions_mut().insert(RouteContext {
            route_id: route_id.clone(),
            version: route.version,
        });
        drop(snapshot);

        let outcome = AssertUnwindSafe(service.oneshot(req)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => error_response(&route_id, err),
            Err(_) => {
                error!(route_id = %route_id, "Route chain panicked");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal gateway error.")
            }
        };

        timer.finish(!response.status().is_server_error());
        response
    }
}

fn error_response(route_id: &str, err: ProxyError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        warn!(route_id, status = %status, error = %err, "Request failed");
    } else {
        debug!(route_id, status = %status, error = %err, "Request failed");
    }
    err.into_response()
}

impl Service<Request<Body>> for PipelineExecutor {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let executor = self.clone();
        Box::pin(async move { Ok(executor.execute(req).await) })
    }
}
