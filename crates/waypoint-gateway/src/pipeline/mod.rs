//! The per-route forwarding pipeline.
//!
//! ```text
//! RouteConfigProvider ─► RouteReloader ─► FilterAssembler ─► RouteTable
//!                                                               │
//!        request ─► PipelineExecutor ─► matched CompiledRoute ──┘
//!                         │
//!                         ▼
//!   RateLimiter ─► CircuitBreaker ─► TimeLimiter ─► Retry ─► Upstream
//! ```

pub mod assembler;
pub mod executor;
pub mod matcher;
pub mod registry;
pub mod reload;
pub mod table;
pub mod upstream;

pub use assembler::{CompiledRoute, FilterAssembler, RouteError};
pub use executor::PipelineExecutor;
pub use matcher::{PathPattern, RouteMatcher};
pub use registry::ResilienceRegistry;
pub use reload::{ReloadOutcome, RouteReloader};
pub use table::{RouteSnapshot, RouteTable};
pub use upstream::UpstreamService;

use crate::domain::error::ProxyError;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// Future returned by every stage of a route chain.
pub type ProxyFuture = BoxFuture<'static, Result<Response, ProxyError>>;

/// Type-erased, cheaply cloneable route chain.
///
/// Each filter wraps the stage below it and is erased into a
/// `RouteService` again, so a chain with any subset of filters has one
/// concrete type. Unlike `BoxCloneService` it is `Sync`, which lets
/// compiled routes live inside the shared route table.
#[derive(Clone)]
pub struct RouteService {
    inner: Arc<dyn Fn(Request<Body>) -> ProxyFuture + Send + Sync>,
}

impl RouteService {
    pub fn new<S>(service: S) -> Self
    where
        S: Service<Request<Body>, Response = Response, Error = ProxyError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            inner: Arc::new(move |req: Request<Body>| -> ProxyFuture {
                Box::pin(service.clone().oneshot(req))
            }),
        }
    }

    /// Build a chain stage from an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |req: Request<Body>| -> ProxyFuture { Box::pin(f(req)) }),
        }
    }
}

impl fmt::Debug for RouteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteService").finish_non_exhaustive()
    }
}

impl Service<Request<Body>> for RouteService {
    type Response = Response;
    type Error = ProxyError;
    type Future = ProxyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        (self.inner)(req)
    }
}
