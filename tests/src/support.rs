//! Shared fixtures: scripted upstreams, filter declarations and gateway wiring.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower::ServiceExt;
use waypoint_gateway::domain::error::text_response;
use waypoint_gateway::{
    FilterDeclaration, GatewayConfig, GatewayService, ProxyError, RouteConfigProvider,
    RouteDefinition, StaticRouteProvider, UpstreamClient,
};

/// One call observed by a [`ScriptedUpstream`].
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub method: Method,
    pub uri: Uri,
}

/// Upstream answering from a fixed script of statuses.
///
/// Once the script runs out the last entry repeats.
pub struct ScriptedUpstream {
    script: Vec<(StatusCode, &'static str)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    completed: AtomicU32,
}

impl ScriptedUpstream {
    pub fn always(status: StatusCode, body: &'static str) -> Arc<Self> {
        Self::sequence(vec![(status, body)])
    }

    pub fn sequence(script: Vec<(StatusCode, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay: None,
            calls: Mutex::new(Vec::new()),
            completed: AtomicU32::new(0),
        })
    }

    /// Answers 200 only after `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: vec![(StatusCode::OK, "slow")],
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
            completed: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls that ran to the end, delay included.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Time between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(Call {
                at: Instant::now(),
                method: request.method().clone(),
                uri: request.uri().clone(),
            });
            calls.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        let (status, body) = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or((StatusCode::OK, ""));
        Ok(text_response(status, body))
    }
}

pub fn rate_limiter(replenish_rate: u32, burst_capacity: u32) -> FilterDeclaration {
    FilterDeclaration::new("RequestRateLimiter")
        .arg("replenishRate", replenish_rate)
        .arg("burstCapacity", burst_capacity)
        .arg("requestedTokens", 1)
}

pub fn retry(max_attempts: u32, wait: &str) -> FilterDeclaration {
    FilterDeclaration::new("Retry")
        .arg("maxAttempts", max_attempts)
        .arg("waitDuration", wait)
}

/// Breaker that stays open for 30s once tripped.
pub fn breaker(name: &str, window: u32, threshold: u32) -> FilterDeclaration {
    FilterDeclaration::new("CircuitBreaker")
        .arg("name", name)
        .arg("slidingWindowSize", window)
        .arg("failureRateThreshold", threshold)
        .arg("waitDurationInOpenState", "30s")
        .arg("permittedNumberOfCallsInHalfOpenState", 1)
        .arg("automaticTransitionFromOpenToHalfOpenEnabled", false)
}

pub fn time_limiter(timeout: &str, cancel: bool) -> FilterDeclaration {
    FilterDeclaration::new("TimeLimiter")
        .arg("timeoutDuration", timeout)
        .arg("cancelRunningFuture", cancel)
}

/// Gateway over an in-memory route source, with routes already loaded.
pub async fn gateway(
    routes: Vec<RouteDefinition>,
    upstream: Arc<dyn UpstreamClient>,
) -> (GatewayService, Arc<StaticRouteProvider>) {
    let provider = Arc::new(StaticRouteProvider::new(routes));
    let service = GatewayService::with_parts(
        GatewayConfig::default(),
        Arc::clone(&provider) as Arc<dyn RouteConfigProvider>,
        upstream,
    )
    .expect("default config is valid");
    service
        .reloader()
        .reload(false)
        .await
        .expect("static routes load");
    (service, provider)
}

pub async fn send(router: &Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible")
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("bound address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}
