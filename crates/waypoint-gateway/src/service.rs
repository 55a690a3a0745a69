//! Gateway service: proxy listener, admin listener and the route reload task.

use crate::adapters::{FileRouteProvider, HttpUpstream, StaticRouteProvider};
use crate::domain::config::GatewayConfig;
use crate::domain::error::{text_response, GatewayError};
use crate::middleware::{GatewayMetrics, TracingLayer};
use crate::pipeline::{FilterAssembler, PipelineExecutor, ResilienceRegistry, RouteReloader, RouteTable};
use crate::ports::outbound::{ProviderError, RouteConfigProvider, UpstreamClient};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

/// Everything the gateway runs, wired from one [`GatewayConfig`].
pub struct GatewayService {
    config: GatewayConfig,
    metrics: Arc<GatewayMetrics>,
    reloader: Arc<RouteReloader>,
}

impl GatewayService {
    /// Build the service with the `reqwest` upstream client and the route
    /// source named in `routes.file` (an empty static source otherwise).
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let upstream = HttpUpstream::new(&config.upstream, config.limits.max_request_body)?;
        let provider: Arc<dyn RouteConfigProvider> = match &config.routes.file {
            Some(path) => Arc::new(FileRouteProvider::new(path.clone())),
            None => {
                warn!("No route source configured, starting with an empty route table");
                Arc::new(StaticRouteProvider::default())
            }
        };

        Self::with_parts(config, provider, Arc::new(upstream))
    }

    /// Build the service around an explicit route source and upstream client.
    pub fn with_parts(
        config: GatewayConfig,
        provider: Arc<dyn RouteConfigProvider>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let metrics = Arc::new(GatewayMetrics::new());
        let registry = Arc::new(ResilienceRegistry::new(Arc::clone(&metrics)));
        let assembler = FilterAssembler::new(
            upstream,
            registry,
            Arc::clone(&metrics),
            config.limits.clone(),
        );
        let reloader = Arc::new(RouteReloader::new(
            provider,
            assembler,
            Arc::new(RouteTable::new()),
            Arc::clone(&metrics),
            config.routes.reload_interval,
        ));

        Ok(Self {
            config,
            metrics,
            reloader,
        })
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn reloader(&self) -> Arc<RouteReloader> {
        Arc::clone(&self.reloader)
    }

    /// Router serving proxied traffic.
    pub fn proxy_router(&self) -> Router {
        let executor = PipelineExecutor::new(
            Arc::clone(self.reloader.table()),
            Arc::clone(&self.metrics),
        );

        Router::new()
            .fallback_service(executor)
            .layer(TracingLayer::new())
            .layer(RequestBodyLimitLayer::new(self.config.limits.max_request_body))
    }

    /// Router for the admin listener.
    pub fn admin_router(&self) -> Router {
        let state = AdminState {
            metrics: Arc::clone(&self.metrics),
            reloader: Arc::clone(&self.reloader),
        };

        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/routes", get(routes))
            .route("/routes/reload", post(reload_routes))
            .route("/circuit-breakers", get(circuit_breakers))
            .route("/circuit-breakers/:route_id/reset", post(reset_breaker))
            .with_state(state)
    }

    /// Load routes, bind the listeners and serve until `shutdown` resolves.
    ///
    /// A failing initial load is logged and leaves the table empty; the
    /// background poll keeps trying.
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting Waypoint gateway...");

        if let Err(e) = self.reloader.reload(false).await {
            error!(error = %e, "Initial route load failed");
        }
        let reload_task = tokio::spawn(Arc::clone(&self.reloader).run());

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut servers = Vec::new();

        if self.config.http.enabled {
            let addr = self.config.http_addr();
            let listener = bind(addr).await?;
            info!(addr = %addr, routes = self.reloader.table().load().len(), "Proxy listener started");
            servers.push(serve(listener, self.proxy_router(), stop_rx.clone()));
        }

        if self.config.admin.enabled {
            let addr = self.config.admin_addr();
            let listener = bind(addr).await?;
            info!(addr = %addr, "Admin listener started");
            servers.push(serve(listener, self.admin_router(), stop_rx.clone()));
        }

        info!("Waypoint gateway started");
        shutdown.await;
        info!("Received shutdown signal");

        let _ = stop_tx.send(true);
        reload_task.abort();
        for server in servers {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task failed"),
            }
        }

        info!("Waypoint gateway stopped");
        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))
}

fn serve(
    listener: TcpListener,
    router: Router,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.changed().await;
            })
            .await
    })
}

#[derive(Clone)]
struct AdminState {
    metrics: Arc<GatewayMetrics>,
    reloader: Arc<RouteReloader>,
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "routes": state.reloader.table().load().len(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    format: Option<String>,
}

async fn metrics(State(state): State<AdminState>, Query(query): Query<MetricsQuery>) -> Response {
    let prometheus = query.format.as_deref() == Some("prometheus");

    #[cfg(feature = "metrics")]
    if prometheus {
        return (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.to_prometheus(),
        )
            .into_response();
    }
    #[cfg(not(feature = "metrics"))]
    if prometheus {
        tracing::debug!("Prometheus format requested without the metrics feature, serving JSON");
    }

    Json(state.metrics.to_json()).into_response()
}

#[derive(Debug, Serialize)]
struct RouteView {
    route_id: String,
    version: u64,
    path: String,
    method: Option<String>,
    upstream: String,
    filters: Vec<&'static str>,
}

async fn routes(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.reloader.table().load();
    let routes: Vec<RouteView> = snapshot
        .routes()
        .iter()
        .map(|route| RouteView {
            route_id: route.route_id.clone(),
            version: route.version,
            path: route.matcher.path().to_string(),
            method: route.matcher.method().map(|m| m.to_string()),
            upstream: route.upstream.to_string(),
            filters: route.filters.iter().map(|kind| kind.name()).collect(),
        })
        .collect();

    Json(serde_json::json!({
        "built_at": snapshot.built_at(),
        "routes": routes,
    }))
}

async fn reload_routes(State(state): State<AdminState>) -> Response {
    match state.reloader.reload(true).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            let status = match e {
                ProviderError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ProviderError::Io(_) | ProviderError::Parse(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn circuit_breakers(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.reloader.assembler().registry().breaker_stats())
}

async fn reset_breaker(
    State(state): State<AdminState>,
    Path(route_id): Path<String>,
) -> Response {
    match state.reloader.assembler().registry().breaker(&route_id) {
        Some(breaker) => {
            breaker.reset();
            info!(route_id = %route_id, "Circuit breaker reset by admin");
            Json(breaker.stats()).into_response()
        }
        None => text_response(
            StatusCode::NOT_FOUND,
            format!("No circuit breaker for route {route_id}."),
        ),
    }
}
